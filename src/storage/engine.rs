//! Storage Engine Facade
//!
//! Exposes Get/Put/Delete/GetAll over the entry store and the write log.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   StorageEngine                      │
//! │   ┌──────────────────────────────────────────────┐   │
//! │   │              Mutex<Inner>                    │   │
//! │   │   ┌────────────────┐   ┌─────────────────┐   │   │
//! │   │   │  EntryStore    │   │ WriteLog (opt.) │   │   │
//! │   │   │ table + list   │   │  append-only    │   │   │
//! │   │   └────────────────┘   └─────────────────┘   │   │
//! │   └──────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────┘
//!        ▲                                  ▲
//!        │ get/put/delete/get_all           │ cleanup_expired
//!   client connections                ExpirySweeper
//! ```
//!
//! A single lock covers both the in-memory structures and the log handle, so
//! the log records mutations in exactly the order they were applied.
//!
//! Put and Delete append to the log first and only then touch memory. A
//! failed append therefore leaves the store unchanged.

use crate::config::EngineConfig;
use crate::error::{Result, StorageError};
use crate::storage::recovery::{self, RecoveryStats};
use crate::storage::store::{Entry, EntryStore};
use crate::storage::wal::{LogRecord, WriteLog};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// State guarded by the engine lock.
#[derive(Debug)]
struct Inner {
    store: EntryStore,
    wal: Option<WriteLog>,
}

/// What happened to a record during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The Put was inserted
    Applied,
    /// The Put was already older than the TTL and was skipped
    Expired,
    /// The Delete removed a live entry
    Deleted,
    /// The Delete named a key that was not live
    Ignored,
}

/// The main storage engine.
///
/// Designed to be wrapped in an `Arc` and shared between connection tasks and
/// the expiry sweeper.
///
/// # Example
///
/// ```
/// use tidekv::storage::StorageEngine;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let engine = StorageEngine::in_memory(Duration::from_secs(60));
///
/// engine.put("name", json!("Ariz")).unwrap();
/// assert_eq!(engine.get("name"), Some(json!("Ariz")));
///
/// engine.delete("name").unwrap();
/// assert_eq!(engine.get("name"), None);
/// ```
pub struct StorageEngine {
    inner: Mutex<Inner>,

    ttl: Duration,

    /// `ttl` as a signed delta, for comparisons against timestamps
    ttl_delta: TimeDelta,

    wal_path: Option<PathBuf>,

    /// Appends end with an fsync
    sync_writes: bool,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total accepted PUT operations
    put_count: AtomicU64,

    /// Statistics: total successful DELETE operations
    del_count: AtomicU64,

    /// Statistics: entries evicted by sweeps or lazy expiry
    expired_count: AtomicU64,

    /// Statistics: entries restored from the write log
    replayed_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("ttl", &self.ttl)
            .field("wal_path", &self.wal_path)
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("put_count", &self.put_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageEngine {
    /// Creates an engine without a write log.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::with_log(ttl, None)
    }

    /// Opens the engine described by `config`.
    ///
    /// Opens the write log if enabled, then replays it when `config.recover`
    /// is set. A corrupt log aborts with `CorruptLog` and no engine is built.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let wal = if config.wal_enabled {
            Some(WriteLog::open(&config.wal_path, config.sync_writes)?)
        } else {
            None
        };

        let engine = Self::with_log(config.ttl, wal);

        if config.recover {
            let stats = engine.recover_from(&config.wal_path)?;
            info!(
                path = %config.wal_path.display(),
                records = stats.records,
                applied = stats.applied,
                expired = stats.expired,
                deleted = stats.deleted,
                keys = engine.len(),
                "Recovered from write log"
            );
        }

        Ok(engine)
    }

    fn with_log(ttl: Duration, wal: Option<WriteLog>) -> Self {
        let wal_path = wal.as_ref().map(|w| w.path().to_path_buf());
        let sync_writes = wal.as_ref().is_some_and(WriteLog::sync_writes);
        Self {
            inner: Mutex::new(Inner {
                store: EntryStore::new(),
                wal,
            }),
            ttl,
            ttl_delta: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            wal_path,
            sync_writes,
            get_count: AtomicU64::new(0),
            put_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            replayed_count: AtomicU64::new(0),
        }
    }

    /// Takes the engine lock. A poisoned lock is recovered, since every
    /// mutation leaves the store consistent before it can panic.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Path of the write log, if appends are enabled.
    pub fn wal_path(&self) -> Option<&Path> {
        self.wal_path.as_deref()
    }

    /// Whether Put and Delete wait for an fsync while holding the engine lock.
    pub fn syncs_writes(&self) -> bool {
        self.sync_writes
    }

    /// Gets the current value for a key.
    ///
    /// Returns `None` if the key was never written, was deleted, or has
    /// reached its TTL. An expired entry found here is evicted on the spot.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();

        let mut inner = self.lock();
        let expired = match inner.store.get(key) {
            Some(entry) if !entry.is_expired(now, self.ttl_delta) => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.store.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            trace!(key = key, "Lazily expired key on read");
        }
        None
    }

    /// Gets the full entry for a key, including its write id and timestamp.
    pub fn get_entry(&self, key: &str) -> Option<Entry> {
        let now = Utc::now();
        let inner = self.lock();
        inner
            .store
            .get(key)
            .filter(|entry| !entry.is_expired(now, self.ttl_delta))
            .cloned()
    }

    /// Stores `value` under `key` with a fresh write id and the current time.
    pub fn put(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.put_with(key, value, Uuid::new_v4(), Utc::now())
    }

    /// Stores `value` under `key` with the given write id and timestamp.
    ///
    /// Live writes and replay share one Put rule (see [`Self::apply_put`]):
    /// a write whose timestamp is already past the TTL is not stored, but it
    /// still supersedes any older value for the key.
    ///
    /// # Errors
    ///
    /// `Serialization` if the record cannot be encoded, `Io` if the append
    /// fails. In both cases the store is left unchanged.
    pub fn put_with(
        &self,
        key: impl Into<String>,
        value: Value,
        write_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let entry = Entry::new(key, write_id, created_at, value);
        let now = Utc::now();

        let mut inner = self.lock();
        if self.apply_put(&mut inner, entry, now, true)? == ReplayOutcome::Applied {
            self.put_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Applies one Put under the lock, appending to the log first if `log` is
    /// set.
    ///
    /// A stale write removes the older entry for its key. On the live path
    /// that removal is logged as a DELETE, so replay ends in the same state.
    fn apply_put(
        &self,
        inner: &mut Inner,
        entry: Entry,
        now: DateTime<Utc>,
        log: bool,
    ) -> Result<ReplayOutcome> {
        if entry.is_expired(now, self.ttl_delta) {
            debug!(key = %entry.key, created_at = %entry.created_at, "Dropped write older than TTL");
            if inner.store.contains_key(&entry.key) {
                if let Some(wal) = inner.wal.as_mut().filter(|_| log) {
                    wal.append(&LogRecord::Delete {
                        ts: now,
                        key: entry.key.clone(),
                    })?;
                }
                inner.store.remove(&entry.key);
            }
            return Ok(ReplayOutcome::Expired);
        }

        if let Some(wal) = inner.wal.as_mut().filter(|_| log) {
            wal.append(&LogRecord::Put {
                ts: entry.created_at,
                id: entry.write_id,
                key: entry.key.clone(),
                value: entry.value.clone(),
            })?;
        }

        trace!(key = %entry.key, write_id = %entry.write_id, "Put");
        inner.store.insert(entry);
        Ok(ReplayOutcome::Applied)
    }

    /// Deletes a key.
    ///
    /// An entry past its TTL counts as absent; it is evicted here like on
    /// [`Self::get`].
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key has no live entry; the log is not touched.
    /// `Io` or `Serialization` if the delete record cannot be appended.
    pub fn delete(&self, key: &str) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.lock();

        let expired = match inner.store.get(key) {
            Some(entry) => entry.is_expired(now, self.ttl_delta),
            None => return Err(StorageError::KeyNotFound(key.to_string())),
        };
        if expired {
            inner.store.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            trace!(key = key, "Lazily expired key on delete");
            return Err(StorageError::KeyNotFound(key.to_string()));
        }

        if let Some(wal) = inner.wal.as_mut() {
            wal.append(&LogRecord::Delete {
                ts: now,
                key: key.to_string(),
            })?;
        }

        inner.store.remove(key);
        self.del_count.fetch_add(1, Ordering::Relaxed);
        trace!(key = key, "Delete");
        Ok(())
    }

    /// Returns all live entries from oldest to newest.
    ///
    /// Diagnostic only; it clones every value under the lock.
    pub fn get_all(&self) -> Vec<Entry> {
        let now = Utc::now();
        let inner = self.lock();
        inner
            .store
            .iter()
            .filter(|entry| !entry.is_expired(now, self.ttl_delta))
            .cloned()
            .collect()
    }

    /// Returns the number of entries currently held (including any expired
    /// entries not yet swept).
    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one expiry sweep against the current time.
    ///
    /// Returns the number of evicted entries.
    pub fn cleanup_expired(&self) -> u64 {
        self.cleanup_expired_at(Utc::now())
    }

    /// Runs one expiry sweep as if the current time were `now`.
    ///
    /// Walks the recency list from its oldest end and stops at the first
    /// entry still within the TTL.
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> u64 {
        let evicted = self.lock().store.pop_expired(now, self.ttl_delta);
        let count = evicted.len() as u64;

        if count > 0 {
            self.expired_count.fetch_add(count, Ordering::Relaxed);
            trace!(
                count = count,
                oldest = %evicted[0].key,
                "Swept expired entries"
            );
        }

        count
    }

    /// Replays the write log at `path` into this engine.
    pub fn recover_from(&self, path: &Path) -> Result<RecoveryStats> {
        recovery::replay(self, path)
    }

    /// Applies one replayed record as of `now`, without logging it again.
    pub(crate) fn apply_replayed(
        &self,
        record: LogRecord,
        now: DateTime<Utc>,
    ) -> Result<ReplayOutcome> {
        let mut inner = self.lock();

        match record {
            LogRecord::Put { ts, id, key, value } => {
                let entry = Entry::new(key, id, ts, value);
                let outcome = self.apply_put(&mut inner, entry, now, false)?;
                if outcome == ReplayOutcome::Applied {
                    self.replayed_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(outcome)
            }
            LogRecord::Delete { key, .. } => Ok(match inner.store.remove(&key) {
                Some(_) => ReplayOutcome::Deleted,
                None => ReplayOutcome::Ignored,
            }),
        }
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            put_ops: self.put_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired_keys: self.expired_count.load(Ordering::Relaxed),
            replayed_keys: self.replayed_count.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) fn recency_keys(&self) -> Vec<String> {
        self.lock().store.iter().map(|e| e.key.clone()).collect()
    }

    #[cfg(test)]
    pub(crate) fn head_key(&self) -> Option<String> {
        self.lock().store.head_key().map(str::to_string)
    }
}

/// Statistics about the storage engine.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub put_ops: u64,
    pub del_ops: u64,
    pub expired_keys: u64,
    pub replayed_keys: u64,
}
