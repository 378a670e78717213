//! Storage Engine Module
//!
//! The core of TideKV: an in-memory key table with a recency list for
//! time-based expiry, an append-only write log, and the recovery pass that
//! replays that log at startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                             │
//! │  ┌──────────────────────────────────────┐                   │
//! │  │            StorageEngine             │                   │
//! │  │  ┌────────────┐    ┌─────────────┐   │   ┌────────────┐  │
//! │  │  │ EntryStore │    │  WriteLog   │◀──┼───│  recovery  │  │
//! │  │  │ + recency  │    │ (JSON lines)│   │   │ (startup)  │  │
//! │  │  └────────────┘    └─────────────┘   │   └────────────┘  │
//! │  └──────────────────────────────────────┘                   │
//! │                     ▲                                       │
//! │                     │ cleanup_expired (1/s)                 │
//! │              ┌──────┴────────┐                              │
//! │              │ ExpirySweeper │                              │
//! │              └───────────────┘                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tidekv::storage::StorageEngine;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::in_memory(Duration::from_secs(300));
//!
//! engine.put("user:1", json!({"name": "Ariz"})).unwrap();
//! assert_eq!(engine.get("user:1"), Some(json!({"name": "Ariz"})));
//! assert_eq!(engine.get("user:2"), None);
//! ```

pub mod database;
pub mod engine;
pub mod expiry;
pub mod recovery;
pub mod store;
pub mod wal;

pub use database::Database;
pub use engine::{ReplayOutcome, StorageEngine, StorageStats};
pub use expiry::ExpirySweeper;
pub use recovery::RecoveryStats;
pub use store::Entry;
pub use wal::{LogReader, LogRecord, WriteLog};
