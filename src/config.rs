//! Engine configuration.
//!
//! Supplied once when the engine is built and never changed afterwards.

use crate::error::{Result, StorageError};
use std::path::PathBuf;
use std::time::Duration;

/// Default time-to-live for every entry (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default delay between two expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default location of the write log.
pub const DEFAULT_WAL_PATH: &str = "./logs/tidekv.log";

/// Configuration for the storage engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Append every accepted mutation to the write log.
    pub wal_enabled: bool,

    /// Path of the write log file.
    pub wal_path: PathBuf,

    /// Maximum age of an entry before it becomes eligible for eviction.
    pub ttl: Duration,

    /// Replay the write log at startup.
    pub recover: bool,

    /// Call `sync_data` after every append.
    ///
    /// The fsync runs while the engine lock is held, so every other request
    /// waits on it. Connection tasks move such writes off the async workers
    /// with `tokio::task::block_in_place`.
    pub sync_writes: bool,

    /// Delay between two background expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wal_enabled: true,
            wal_path: PathBuf::from(DEFAULT_WAL_PATH),
            ttl: DEFAULT_TTL,
            recover: true,
            sync_writes: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Create a config that logs to and recovers from `wal_path`.
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_wal_enabled(mut self, enabled: bool) -> Self {
        self.wal_enabled = enabled;
        self
    }

    pub fn with_recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(StorageError::Config("ttl must be greater than zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(StorageError::Config(
                "sweep interval must be greater than zero".into(),
            ));
        }
        if self.wal_path.as_os_str().is_empty() && (self.wal_enabled || self.recover) {
            return Err(StorageError::Config("write log path is empty".into()));
        }
        Ok(())
    }
}
