//! Batchline Bridge Daemon
//!
//! The `batchlined` binary runs the query bridge over standard streams:
//! - Reads one JSON request per line from stdin
//! - Writes one JSON response per line to stdout
//! - Logs to stderr, including a summary of every delivered chunk
//!
//! Chunks are written into an in-process heap host and released as soon as
//! they are summarized.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings
//! batchlined
//!
//! # Use configuration file
//! batchlined --config /etc/batchline/batchlined.toml
//!
//! # Feed a query
//! printf '%s\n' \
//!   '{"nd_type":"Query","sql":"select 1 as one","query_id":"Q1"}' \
//!   '{"nd_type":"BatchRequest","query_id":"Q1"}' | batchlined
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use batchline_chunk::{HeapAllocator, UnsupportedColumnPolicy};
use batchline_server::{Bridge, BridgeConfig, BridgeHandle, DataFusionEngine, Response};

/// Batchline Bridge Daemon
#[derive(Parser, Debug)]
#[command(
    name = "batchlined",
    version,
    about = "Batchline query bridge",
    long_about = "Batchline streams analytical query results as columnar chunks.\n\n\
                  This daemon answers JSON requests read from stdin on stdout."
)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "BATCHLINE_LOG_LEVEL")]
    log_level: String,

    /// Rows per engine batch
    #[arg(long, env = "BATCHLINE_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Statement and pull timeout in seconds (0 disables)
    #[arg(long, env = "BATCHLINE_QUERY_TIMEOUT")]
    query_timeout_secs: Option<u64>,

    /// Skip unsupported columns instead of failing the query
    #[arg(long)]
    skip_unsupported: bool,

    /// Chunk memory budget in MB
    #[arg(long, env = "BATCHLINE_CHUNK_BUDGET_MB")]
    chunk_budget_mb: Option<usize>,

    /// Log statement text
    #[arg(long)]
    query_logging: bool,

    /// Print configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    run_bridge(config).await
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_new(format!(
        "batchlined={level},batchline_server={level},batchline_chunk={level}"
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries responses
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = if let Some(path) = &args.config {
        BridgeConfig::from_file(path).context("Failed to load config file")?
    } else {
        BridgeConfig::default()
    };

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }

    if let Some(secs) = args.query_timeout_secs {
        config.query_timeout_secs = secs;
    }

    if args.skip_unsupported {
        config.encoder.unsupported_columns = UnsupportedColumnPolicy::Skip;
    }

    if let Some(mb) = args.chunk_budget_mb {
        config.chunk_budget_bytes = Some(mb * 1024 * 1024);
    }

    if args.query_logging {
        config.query_logging = true;
    }

    Ok(config)
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let host = Arc::new(match config.chunk_budget_bytes {
        Some(limit) => HeapAllocator::with_limit(limit),
        None => HeapAllocator::new(),
    });
    let engine = Arc::new(DataFusionEngine::from_config(&config));

    info!("Bridge configuration:");
    info!("  Batch size: {}", config.batch_size);
    info!("  Query timeout: {}s", config.query_timeout_secs);
    info!("  Unsupported columns: {:?}", config.encoder.unsupported_columns);

    let mut bridge = Bridge::spawn(&config, engine, host.clone());
    if let Err(e) = bridge.ready().await {
        warn!("Engine not ready at startup: {}", e);
    }

    let forwarder = bridge.forward_lines(BufReader::new(tokio::io::stdin()));
    let shutdown_requested = shutdown_signal();
    tokio::pin!(shutdown_requested);

    loop {
        tokio::select! {
            response = bridge.recv() => {
                match response {
                    Some(response) => emit(&host, &response)?,
                    None => break,
                }
            }
            _ = &mut shutdown_requested => {
                info!("Shutdown signal received");
                forwarder.abort();
                break;
            }
        }
    }

    match forwarder.await {
        Ok(Ok(forwarded)) => debug!("stdin closed after {} requests", forwarded),
        Ok(Err(e)) => return Err(e).context("Failed to read stdin"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!("stdin forwarder ended abnormally: {}", e),
    }

    shutdown(bridge, &host).await
}

async fn shutdown(bridge: BridgeHandle, host: &HeapAllocator) -> Result<()> {
    let active = bridge.registry().len();
    if active > 0 {
        warn!("Abandoning {} open queries", active);
    }

    for response in bridge.shutdown().await {
        emit(host, &response)?;
    }

    let stats = host.stats();
    info!(
        "Bridge stopped: {} chunks written, {} bytes still held",
        stats.allocations, stats.bytes_in_use
    );
    Ok(())
}

/// Summarizes and releases a delivered chunk, then writes the response.
fn emit(host: &HeapAllocator, response: &Response) -> Result<()> {
    if let Some(address) = response.chunk_address().filter(|a| !a.is_terminal()) {
        match host.take(address) {
            Some(chunk) => match chunk.reader() {
                Ok(reader) => info!(
                    query_id = %response.query_id(),
                    columns = reader.column_count(),
                    rows = reader.row_count(),
                    done = reader.done(),
                    bytes = chunk.len(),
                    "chunk {}",
                    reader.names().join(",")
                ),
                Err(e) => error!(query_id = %response.query_id(), error = %e, "unreadable chunk"),
            },
            None => error!(query_id = %response.query_id(), %address, "chunk not found in host"),
        }
    }

    println!("{}", response.to_json()?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
