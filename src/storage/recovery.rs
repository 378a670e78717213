//! Write-log recovery.
//!
//! Rebuilds the store at startup by re-applying every record in the write log,
//! front to back, with their logged timestamps and write ids. Runs before the
//! expiry sweeper starts and before any client is served.
//!
//! - A `PUT` already older than the TTL is skipped rather than inserted and
//!   swept later. It also clears any earlier entry for the same key.
//! - A `DELETE` removes the key, so deleted keys do not come back.
//! - A line that does not decode aborts the whole recovery. There is no
//!   skip-and-continue mode.

use crate::error::Result;
use crate::storage::engine::{ReplayOutcome, StorageEngine};
use crate::storage::wal::LogReader;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, trace};

/// Counters describing one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records read from the log
    pub records: u64,
    /// Puts inserted into the store
    pub applied: u64,
    /// Puts skipped because they were already past the TTL
    pub expired: u64,
    /// Deletes that removed a live key
    pub deleted: u64,
}

/// Replays the log at `path` into `engine`.
///
/// A missing file is treated as an empty log.
pub fn replay(engine: &StorageEngine, path: &Path) -> Result<RecoveryStats> {
    let mut stats = RecoveryStats::default();

    if !path.exists() {
        debug!(path = %path.display(), "No write log to recover from");
        return Ok(stats);
    }

    let now = Utc::now();
    for record in LogReader::open(path)? {
        let (line, record) = record?;
        stats.records += 1;

        match engine.apply_replayed(record, now)? {
            ReplayOutcome::Applied => stats.applied += 1,
            ReplayOutcome::Expired => {
                stats.expired += 1;
                trace!(line = line, "Skipped expired record");
            }
            ReplayOutcome::Deleted => stats.deleted += 1,
            ReplayOutcome::Ignored => trace!(line = line, "Delete for absent key"),
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::wal::{LogRecord, WriteLog};
    use chrono::{DateTime, TimeDelta};
    use serde_json::{json, Value};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn put(key: &str, value: Value, ts: DateTime<Utc>) -> LogRecord {
        LogRecord::Put {
            ts,
            id: Uuid::new_v4(),
            key: key.to_string(),
            value,
        }
    }

    fn delete(key: &str, ts: DateTime<Utc>) -> LogRecord {
        LogRecord::Delete {
            ts,
            key: key.to_string(),
        }
    }

    fn write_log(dir: &TempDir, records: &[LogRecord]) -> std::path::PathBuf {
        let path = dir.path().join("wal.log");
        let mut log = WriteLog::open(&path, false).unwrap();
        for record in records {
            log.append(record).unwrap();
        }
        path
    }

    fn engine() -> StorageEngine {
        StorageEngine::in_memory(Duration::from_secs(60))
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let engine = engine();

        let stats = replay(&engine, &dir.path().join("absent.log")).unwrap();
        assert_eq!(stats, RecoveryStats::default());
        assert!(engine.is_empty());
    }

    #[test]
    fn test_replay_restores_values_and_ids() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let first = put("a", json!(1), now - TimeDelta::seconds(2));
        let path = write_log(
            &dir,
            &[first.clone(), put("b", json!({"x": "y"}), now)],
        );

        let engine = engine();
        let stats = replay(&engine, &path).unwrap();

        assert_eq!(stats.records, 2);
        assert_eq!(stats.applied, 2);
        assert_eq!(engine.get("b"), Some(json!({"x": "y"})));

        let entry = engine.get_entry("a").unwrap();
        match first {
            LogRecord::Put { ts, id, .. } => {
                assert_eq!(entry.write_id, id);
                assert_eq!(entry.created_at, ts);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_later_put_wins() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let path = write_log(
            &dir,
            &[
                put("k", json!("v1"), now - TimeDelta::seconds(1)),
                put("k", json!("v2"), now),
            ],
        );

        let engine = engine();
        replay(&engine, &path).unwrap();
        assert_eq!(engine.get("k"), Some(json!("v2")));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_expired_records_are_dropped() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let path = write_log(
            &dir,
            &[
                put("old", json!(1), now - TimeDelta::seconds(120)),
                put("fresh", json!(2), now - TimeDelta::seconds(1)),
            ],
        );

        let engine = engine();
        let stats = replay(&engine, &path).unwrap();

        assert_eq!(stats.expired, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(engine.get("old"), None);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_expired_overwrite_clears_older_value() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        // Out-of-order timestamps, as after a clock step backwards
        let path = write_log(
            &dir,
            &[
                put("k", json!("live"), now - TimeDelta::seconds(1)),
                put("k", json!("stale"), now - TimeDelta::seconds(120)),
            ],
        );

        let engine = engine();
        replay(&engine, &path).unwrap();
        assert_eq!(engine.get("k"), None);
    }

    #[test]
    fn test_deletes_are_replayed() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let path = write_log(
            &dir,
            &[
                put("x", json!(1), now - TimeDelta::seconds(3)),
                put("y", json!(2), now - TimeDelta::seconds(2)),
                delete("x", now - TimeDelta::seconds(1)),
                delete("never", now),
            ],
        );

        let engine = engine();
        let stats = replay(&engine, &path).unwrap();

        assert_eq!(stats.deleted, 1);
        assert_eq!(engine.get("x"), None);
        let all: Vec<_> = engine.get_all().into_iter().map(|e| e.key).collect();
        assert_eq!(all, vec!["y"]);
    }

    #[test]
    fn test_replay_keeps_recency_sorted_by_age() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let path = write_log(
            &dir,
            &[put("replayed", json!(1), now - TimeDelta::seconds(30))],
        );

        let engine = StorageEngine::in_memory(Duration::from_secs(60));
        engine.put("live", json!(2)).unwrap();
        replay(&engine, &path).unwrap();

        assert_eq!(engine.recency_keys(), vec!["replayed", "live"]);

        // A sweep 45s from now must evict the replayed entry even though it was
        // inserted after the live one
        assert_eq!(engine.cleanup_expired_at(now + TimeDelta::seconds(45)), 1);
        assert_eq!(engine.recency_keys(), vec!["live"]);
    }

    #[test]
    fn test_corrupt_line_aborts() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, &[put("a", json!(1), Utc::now())]);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{\"op\":\"PUT\",\"key\":\"b\",\"value\":\n");
        fs::write(&path, contents).unwrap();

        let engine = engine();
        match replay(&engine, &path) {
            Err(StorageError::CorruptLog { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt log error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_line_aborts_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, &[put("a", json!(1), Utc::now())]);
        let mut contents = fs::read(&path).unwrap();
        contents.extend_from_slice(b"\xff\xfe garbage\n");
        fs::write(&path, contents).unwrap();

        let engine = engine();
        match replay(&engine, &path) {
            Err(StorageError::CorruptLog { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt log error, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_does_not_append() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, &[put("a", json!(1), Utc::now())]);
        let before = fs::read_to_string(&path).unwrap();

        let config = crate::config::EngineConfig::new(&path).with_sync_writes(false);
        let engine = StorageEngine::open(&config).unwrap();

        assert_eq!(engine.get("a"), Some(json!(1)));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }
}
