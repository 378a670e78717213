//! # TideKV - An In-Memory Key-Value Store with Expiry and Write-Log Recovery
//!
//! TideKV keeps the latest JSON value for every key in memory, evicts entries
//! once they outlive a fixed time-to-live, and records every accepted write in
//! an append-only log that is replayed when the process restarts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               TideKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   RESP      │    │            StorageEngine (one Mutex)         │   │
//! │  │   Parser    │    │   EntryStore + recency list  │  WriteLog     │   │
//! │  └─────────────┘    └──────────────────────────────────────────────┘   │
//! │                            ▲                          ▲                 │
//! │                            │ every second             │ at startup      │
//! │                     ┌──────┴────────┐          ┌──────┴──────┐          │
//! │                     │ ExpirySweeper │          │  Recovery   │          │
//! │                     └───────────────┘          └─────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidekv::{CommandHandler, ConnectionStats, Database, EngineConfig};
//! use tidekv::connection::handle_connection;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Replays ./logs/tidekv.log, then starts the sweeper
//!     let db = Database::open(EngineConfig::default())?;
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6380").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = CommandHandler::new(Arc::clone(db.engine()));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: entry store, recency list, write log, recovery, sweeper
//! - [`protocol`]: RESP parser and reply types
//! - [`commands`]: `GET`/`PUT`/`DEL`/`GETALL` and server commands
//! - [`connection`]: client connection loop
//! - [`config`]: engine configuration
//! - [`error`]: storage error type

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use config::EngineConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use error::{Result, StorageError};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{Database, Entry, ExpirySweeper, StorageEngine};

/// The default port TideKV listens on
pub const DEFAULT_PORT: u16 = 6380;

/// The default host TideKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
