//! Background Expiry Sweeper
//!
//! A tokio task that wakes on a fixed interval (one second by default), takes
//! the engine lock, and evicts entries from the oldest end of the recency list
//! until it reaches one that is still within the TTL.
//!
//! Reads already hide expired entries, so the sweeper's job is reclaiming
//! memory held by keys nobody reads again.
//!
//! ## Lifecycle
//!
//! The task lives exactly as long as its [`ExpirySweeper`] handle. Dropping the
//! handle (or calling [`ExpirySweeper::stop`]) signals the task through a
//! watch channel and it exits before its next sweep.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Starts the sweeper as a background task on the current tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use tidekv::storage::{ExpirySweeper, StorageEngine};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let engine = Arc::new(StorageEngine::in_memory(Duration::from_secs(60)));
    /// let sweeper = ExpirySweeper::start(engine, Duration::from_secs(1));
    ///
    /// // Dropping the sweeper stops it
    /// drop(sweeper);
    /// ```
    pub fn start(engine: Arc<StorageEngine>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(sweeper_loop(engine, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Background expiry sweeper started");

        Self {
            shutdown_tx,
            task: Some(task),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signals the sweeper to stop.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }

    /// Stops the sweeper and waits for the task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = engine.cleanup_expired();

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}
