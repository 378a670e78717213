//! TideKV server entry point.
//!
//! Parses flags, recovers the store from its write log, starts the expiry
//! sweeper, and then accepts client connections.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tidekv::commands::CommandHandler;
use tidekv::config::EngineConfig;
use tidekv::connection::{handle_connection, ConnectionStats};
use tidekv::storage::{Database, StorageEngine};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Server configuration
struct Config {
    host: String,
    port: u16,
    engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: tidekv::DEFAULT_HOST.to_string(),
            port: tidekv::DEFAULT_PORT,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--ttl" => {
                    let secs: f64 = value_of(&args, i, "--ttl").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid TTL");
                        std::process::exit(1);
                    });
                    config.engine.ttl = Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
                        eprintln!("Error: TTL out of range");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--log-file" => {
                    config.engine.wal_path = PathBuf::from(value_of(&args, i, "--log-file"));
                    i += 2;
                }
                "--no-log" => {
                    config.engine.wal_enabled = false;
                    i += 1;
                }
                "--no-recover" => {
                    config.engine.recover = false;
                    i += 1;
                }
                "--no-sync" => {
                    config.engine.sync_writes = false;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("TideKV version {}", tidekv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Returns the value following the flag at `i`, or exits.
fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
TideKV - In-Memory Key-Value Store with Expiry and Write-Log Recovery

USAGE:
    tidekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>       Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>       Port to listen on (default: 6380)
        --ttl <SECONDS>     Time-to-live of every entry (default: 300)
        --log-file <PATH>   Write log location (default: ./logs/tidekv.log)
        --no-log            Do not append mutations to the write log
        --no-recover        Do not replay the write log at startup
        --no-sync           Skip fsync after each log append
    -v, --version           Print version information
        --help              Print this help message

EXAMPLES:
    tidekv                          # Start on 127.0.0.1:6380
    tidekv --ttl 60                 # Entries live for one minute
    tidekv --no-log --no-recover    # Pure in-memory mode

CONNECTING:
    Use redis-cli, or any client that sends plain text lines:
    $ redis-cli -p 6380
    127.0.0.1:6380> PUT user '{{"name": "Ariz"}}'
    OK
    127.0.0.1:6380> GET user
    "{{\"name\":\"Ariz\"}}"
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
TideKV v{} - In-Memory Key-Value Store
──────────────────────────────────────────────────────────────
Server started on {}
Entry TTL: {:?}   Write log: {}

Use Ctrl+C to shutdown gracefully.
"#,
        tidekv::VERSION,
        config.bind_address(),
        config.engine.ttl,
        if config.engine.wal_enabled {
            config.engine.wal_path.display().to_string()
        } else {
            "disabled".to_string()
        }
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Recovery must finish before anything is served; a corrupt log stops here
    let db = match Database::open(config.engine.clone()) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to open storage engine");
            return Err(e.into());
        }
    };

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    print_banner(&config);
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(db.engine()), stats) => {}
        _ = shutdown => {}
    }

    db.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&storage));
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
