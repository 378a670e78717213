//! Per-client connection loop.
//!
//! Each accepted socket gets its own task that reads bytes into a buffer,
//! parses as many complete requests as the buffer holds, executes them in
//! order, and writes the replies back. TCP may deliver a request in pieces or
//! several requests at once, so partial frames stay buffered until the rest
//! arrives.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;
use tracing::{debug, error, info, trace, warn};

/// A client may not buffer more than this many unparsed bytes (32 MB)
const MAX_BUFFER_SIZE: usize = 32 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Sockets accepted since startup
    pub connections_accepted: AtomicU64,
    /// Sockets currently open
    pub active_connections: AtomicU64,
    /// Requests executed
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Why a connection stopped.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("client closed mid-request with {0} bytes buffered")]
    UnexpectedEof(usize),

    #[error("request exceeds the 32 MB buffer limit")]
    BufferFull,
}

/// Result of draining the read buffer once.
enum Drained {
    /// Every complete request was answered; wait for more bytes
    NeedMore,
    /// The client sent QUIT
    Quit,
    /// Bad framing; the error reply is already queued
    Malformed(ParseError),
}

/// One client session: the socket, its pending input and its queued replies.
pub struct ConnectionHandler {
    stream: TcpStream,
    addr: SocketAddr,
    input: BytesMut,
    output: Vec<u8>,
    command_handler: CommandHandler,
    /// Run requests under `block_in_place` because they may fsync
    offload: bool,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        // block_in_place panics on a current-thread runtime
        let offload = command_handler.blocks_on_writes()
            && Handle::try_current()
                .is_ok_and(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread);

        Self {
            stream,
            addr,
            input: BytesMut::with_capacity(READ_CHUNK),
            output: Vec::with_capacity(READ_CHUNK),
            command_handler,
            offload,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Serves requests until the client quits, hangs up, or breaks framing.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.serve().await;
        match &result {
            Ok(()) => info!(client = %self.addr, "Client quit"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(e)) if e.kind() == ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let drained = self.drain();
            // Replies for everything parsed so far go out in one write
            self.flush_output().await?;

            match drained {
                Drained::NeedMore => self.fill().await?,
                Drained::Quit => return Ok(()),
                Drained::Malformed(e) => return Err(e.into()),
            }
        }
    }

    /// Executes every complete request in the input buffer, queueing replies.
    fn drain(&mut self) -> Drained {
        while !self.input.is_empty() {
            let request = match self.parser.parse(&self.input) {
                Ok(Some((request, consumed))) => {
                    let _ = self.input.split_to(consumed);
                    request
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "Malformed request");
                    RespValue::error(format!("ERR protocol error: {}", e))
                        .serialize_into(&mut self.output);
                    return Drained::Malformed(e);
                }
            };

            trace!(client = %self.addr, pending = self.input.len(), "Parsed request");
            let quit = is_quit(&request);
            let reply = if self.offload {
                let handler = &self.command_handler;
                task::block_in_place(|| handler.execute(request))
            } else {
                self.command_handler.execute(request)
            };
            reply.serialize_into(&mut self.output);
            self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);

            if quit {
                return Drained::Quit;
            }
        }
        Drained::NeedMore
    }

    async fn fill(&mut self) -> Result<(), ConnectionError> {
        if self.input.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.input.len(), "Request too large");
            return Err(ConnectionError::BufferFull);
        }

        self.input.reserve(READ_CHUNK);
        let n = self.stream.read_buf(&mut self.input).await?;
        if n == 0 {
            return match self.input.len() {
                0 => Err(ConnectionError::ClientDisconnected),
                pending => Err(ConnectionError::UnexpectedEof(pending)),
            };
        }

        self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn flush_output(&mut self) -> Result<(), ConnectionError> {
        if self.output.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.output).await?;
        self.stats
            .bytes_written
            .fetch_add(self.output.len() as u64, Ordering::Relaxed);
        self.output.clear();
        Ok(())
    }
}

fn is_quit(request: &RespValue) -> bool {
    let RespValue::Array(args) = request else {
        return false;
    };
    args.first()
        .and_then(RespValue::as_str)
        .is_some_and(|name| name.eq_ignore_ascii_case("QUIT"))
}

/// Runs one client session to completion, logging anything unusual.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    // `run` already logged the outcome
    let _ = ConnectionHandler::new(stream, addr, command_handler, stats)
        .run()
        .await;
}
