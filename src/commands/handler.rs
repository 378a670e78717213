//! Command Handler
//!
//! Dispatches parsed RESP requests to the storage engine.
//!
//! ## Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `GET key` - the JSON-encoded value, or null
//! - `PUT key json [key json ...]` - every value is validated before any write
//! - `DEL key` - `:1`, or a `NOTFOUND` error
//! - `GETALL` - `key, json, key, json, ...` from oldest to newest
//! - `DBSIZE`
//! - `INFO`
//! - `QUIT`
//!
//! ## Error replies
//!
//! | Cause                              | Reply prefix |
//! |------------------------------------|--------------|
//! | key has no live entry              | `NOTFOUND`   |
//! | bad arity, invalid JSON, bad key   | `ERR`        |
//! | log append / serialization failure | `SERVERERR`  |

use crate::error::StorageError;
use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Handles commands by dispatching them to the storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    /// Server start time for INFO
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            start_time: Instant::now(),
        }
    }

    /// Whether executing a write may block on disk.
    pub fn blocks_on_writes(&self) -> bool {
        self.storage.syncs_writes()
    }

    /// Executes a request and returns the reply.
    pub fn execute(&self, command: RespValue) -> RespValue {
        let args = match command {
            RespValue::Array(args) => args,
            _ => return RespValue::error("ERR invalid command format"),
        };

        let Some(name) = args.first().and_then(RespValue::as_str) else {
            return RespValue::error("ERR invalid command name");
        };

        self.dispatch(&name.to_uppercase(), &args[1..])
    }

    fn dispatch(&self, cmd: &str, args: &[RespValue]) -> RespValue {
        match cmd {
            "GET" => self.cmd_get(args),
            "PUT" => self.cmd_put(args),
            "DEL" => self.cmd_del(args),
            "GETALL" => self.cmd_getall(args),
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "INFO" => self.cmd_info(args),
            "QUIT" => RespValue::ok(),
            _ => RespValue::error(format!("ERR unknown command '{}'", cmd)),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn wrong_arity(cmd: &str) -> RespValue {
        RespValue::error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd
        ))
    }

    fn get_key<'a>(&self, value: &'a RespValue) -> Option<&'a str> {
        value.as_str().filter(|k| !k.is_empty())
    }

    fn encode_value(value: &Value) -> RespValue {
        match serde_json::to_vec(value) {
            Ok(json) => RespValue::bulk_string(Bytes::from(json)),
            Err(e) => Self::storage_error(StorageError::Serialization(e)),
        }
    }

    /// Maps an engine error onto an error reply.
    fn storage_error(err: StorageError) -> RespValue {
        if err.is_not_found() {
            return RespValue::error(format!("NOTFOUND {}", err));
        }
        warn!(error = %err, "Storage operation failed");
        RespValue::error(format!("SERVERERR {}", err))
    }

    // ========================================================================
    // Key-value commands
    // ========================================================================

    /// GET key
    fn cmd_get(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_arity("GET");
        }

        let Some(key) = self.get_key(&args[0]) else {
            return RespValue::error("ERR invalid key");
        };

        match self.storage.get(key) {
            Some(value) => Self::encode_value(&value),
            None => RespValue::null(),
        }
    }

    /// PUT key json [key json ...]
    fn cmd_put(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() || args.len() % 2 != 0 {
            return Self::wrong_arity("PUT");
        }

        let mut pairs = Vec::with_capacity(args.len() / 2);
        for pair in args.chunks(2) {
            let Some(key) = self.get_key(&pair[0]) else {
                return RespValue::error("ERR invalid key");
            };
            let Some(raw) = pair[1].as_str() else {
                return RespValue::error(format!("ERR value for '{}' is not UTF-8", key));
            };
            match serde_json::from_str::<Value>(raw) {
                Ok(value) => pairs.push((key, value)),
                Err(e) => {
                    return RespValue::error(format!("ERR invalid JSON for '{}': {}", key, e));
                }
            }
        }

        for (key, value) in pairs {
            if let Err(e) = self.storage.put(key, value) {
                return Self::storage_error(e);
            }
        }

        RespValue::ok()
    }

    /// DEL key
    fn cmd_del(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_arity("DEL");
        }

        let Some(key) = self.get_key(&args[0]) else {
            return RespValue::error("ERR invalid key");
        };

        match self.storage.delete(key) {
            Ok(()) => RespValue::integer(1),
            Err(e) => Self::storage_error(e),
        }
    }

    /// GETALL
    fn cmd_getall(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::wrong_arity("GETALL");
        }

        let entries = self.storage.get_all();
        let mut items = Vec::with_capacity(entries.len() * 2);
        for entry in entries {
            items.push(RespValue::bulk_string(Bytes::from(entry.key)));
            items.push(Self::encode_value(&entry.value));
        }
        RespValue::array(items)
    }

    // ========================================================================
    // Server commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[RespValue]) -> RespValue {
        match args {
            [] => RespValue::pong(),
            [message] => message.clone(),
            _ => Self::wrong_arity("PING"),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[RespValue]) -> RespValue {
        match args {
            [message] => message.clone(),
            _ => Self::wrong_arity("ECHO"),
        }
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::wrong_arity("DBSIZE");
        }
        RespValue::integer(self.storage.len() as i64)
    }

    /// INFO
    fn cmd_info(&self, _args: &[RespValue]) -> RespValue {
        let stats = self.storage.stats();
        let wal = self
            .storage
            .wal_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "disabled".to_string());

        let info = format!(
            "# Server\r\n\
             tidekv_version:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Storage\r\n\
             ttl_seconds:{}\r\n\
             write_log:{}\r\n\
             keys:{}\r\n\
             \r\n\
             # Stats\r\n\
             get_ops:{}\r\n\
             put_ops:{}\r\n\
             del_ops:{}\r\n\
             expired_keys:{}\r\n\
             replayed_keys:{}\r\n",
            crate::VERSION,
            self.start_time.elapsed().as_secs(),
            self.storage.ttl().as_secs_f64(),
            wal,
            stats.keys,
            stats.get_ops,
            stats.put_ops,
            stats.del_ops,
            stats.expired_keys,
            stats.replayed_keys,
        );

        RespValue::bulk_string(Bytes::from(info))
    }
}
