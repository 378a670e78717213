//! Command Handler Module
//!
//! Turns parsed RESP requests into storage engine calls and engine results
//! into RESP replies.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  RESP Parser    │────>│ CommandHandler  │────>│ StorageEngine   │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```

pub mod handler;

pub use handler::CommandHandler;
