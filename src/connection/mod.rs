//! Connection Handler Module
//!
//! Every accepted client socket is served by its own tokio task.
//!
//! ```text
//!  TcpListener (main.rs)
//!        │ accept()
//!        ▼
//!  ConnectionHandler ──> RespParser ──> CommandHandler ──> StorageEngine
//!        ▲                                    │
//!        └──────────── reply ─────────────────┘
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
