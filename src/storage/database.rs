//! Engine lifecycle.
//!
//! [`Database`] owns the storage engine together with its expiry sweeper.
//! Opening it recovers the write log before the sweeper starts; dropping it
//! stops the sweeper.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::storage::{ExpirySweeper, StorageEngine};
use std::sync::Arc;
use tracing::info;

/// A running storage engine plus its background sweeper.
#[derive(Debug)]
pub struct Database {
    engine: Arc<StorageEngine>,
    sweeper: ExpirySweeper,
}

impl Database {
    /// Opens the engine and starts the sweeper.
    ///
    /// Must be called from within a tokio runtime. Recovery runs to completion
    /// (or fails) before the sweeper is started.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let engine = Arc::new(StorageEngine::open(&config)?);
        let sweeper = ExpirySweeper::start(Arc::clone(&engine), config.sweep_interval);

        info!(
            ttl_secs = config.ttl.as_secs_f64(),
            wal_enabled = config.wal_enabled,
            keys = engine.len(),
            "Database opened"
        );

        Ok(Self { engine, sweeper })
    }

    /// The shared engine handle, for connection handlers.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Stops the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        self.sweeper.shutdown().await;
        info!("Database closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> EngineConfig {
        EngineConfig::new(dir.path().join("wal.log"))
            .with_sync_writes(false)
            .with_sweep_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_open_and_reopen() {
        let dir = TempDir::new().unwrap();

        let db = Database::open(config(&dir)).unwrap();
        db.engine().put("a", json!(1)).unwrap();
        db.engine().put("b", json!([1, 2])).unwrap();
        db.shutdown().await;

        let db = Database::open(config(&dir)).unwrap();
        assert_eq!(db.engine().get("a"), Some(json!(1)));
        assert_eq!(db.engine().get("b"), Some(json!([1, 2])));
        assert_eq!(db.engine().stats().replayed_keys, 2);
    }

    #[tokio::test]
    async fn test_sweeper_runs_against_engine() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(config(&dir).with_ttl(Duration::from_millis(30))).unwrap();

        db.engine().put("short", json!("lived")).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(db.engine().len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let result = Database::open(config(&dir).with_ttl(Duration::ZERO));
        assert!(result.is_err());
    }
}
