//! Write Log
//!
//! An append-only record of every accepted mutation, used only to rebuild the
//! store after a restart.
//!
//! ## Format
//!
//! One JSON object per line:
//!
//! ```text
//! {"op":"PUT","ts":"2026-10-17T09:30:00.123456789Z","id":"6f0c...","key":"a","value":1}
//! {"op":"DELETE","ts":"2026-10-17T09:31:00Z","key":"a"}
//! ```
//!
//! Keys and values are JSON-escaped, so commas, quotes and newlines inside
//! them cannot split or shift a record.

use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// A single mutation as recorded in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum LogRecord {
    Put {
        ts: DateTime<Utc>,
        id: Uuid,
        key: String,
        value: Value,
    },
    Delete {
        ts: DateTime<Utc>,
        key: String,
    },
}

impl LogRecord {
    pub fn key(&self) -> &str {
        match self {
            LogRecord::Put { key, .. } | LogRecord::Delete { key, .. } => key,
        }
    }

    /// Encodes the record as one newline-terminated line.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decodes one line. A trailing newline is ignored.
    pub fn decode(line: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Append handle on the write log file.
#[derive(Debug)]
pub struct WriteLog {
    path: PathBuf,
    file: File,
    sync_writes: bool,
}

impl WriteLog {
    /// Opens (or creates) the log at `path` for appending.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl Into<PathBuf>, sync_writes: bool) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), sync_writes, "Write log opened");

        Ok(Self {
            path,
            file,
            sync_writes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether every append ends with `sync_data`.
    pub fn sync_writes(&self) -> bool {
        self.sync_writes
    }

    /// Writes one record and flushes it before returning.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let line = record.encode()?;
        self.file.write_all(&line)?;
        self.file.flush()?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

/// Reads log records front to back.
///
/// Yields `(line_number, record)` pairs with 1-based line numbers. Blank lines
/// are skipped; any other line that does not decode is a `CorruptLog` error.
pub struct LogReader {
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_no: usize,
}

impl LogReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_no: 0,
        })
    }
}

impl Iterator for LogReader {
    type Item = Result<(usize, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(StorageError::Io(e))),
            }
            self.line_no += 1;

            let line = match std::str::from_utf8(&self.buf) {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(StorageError::CorruptLog {
                        line: self.line_no,
                        reason: e.to_string(),
                    }))
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let record = LogRecord::decode(line).map_err(|e| StorageError::CorruptLog {
                line: self.line_no,
                reason: e.to_string(),
            });
            return Some(record.map(|r| (self.line_no, r)));
        }
    }
}
