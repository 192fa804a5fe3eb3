use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use flatbridge::executor::{ClickHouseConnector, Connector, MemoryConnector, MemoryStore};
use flatbridge::rpc::{router, serve_lines, RpcMethods};
use flatbridge::{Config, LogFormat};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// In-memory store, for local testing
    Mock,
    /// ClickHouse over its HTTP interface
    Clickhouse,
}

#[derive(Subcommand)]
enum Command {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// HTTP server: JSON-RPC over WebSocket at /ws, file downloads at /files/:name
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        listen: SocketAddr,
    },
}

#[derive(Parser)]
#[command(name = "flatbridge-server")]
#[command(about = "Moves data between ClickHouse tables and delimited flat files")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, value_enum, default_value = "clickhouse")]
    backend: Backend,

    /// Configuration file (TOML); environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging.format);

    let connector: Arc<dyn Connector> = match args.backend {
        Backend::Mock => Arc::new(MemoryConnector::new(Arc::new(MemoryStore::new()))),
        Backend::Clickhouse => Arc::new(ClickHouseConnector::new(Duration::from_secs(
            config.store.request_timeout_secs,
        ))),
    };
    info!(
        backend = ?connector.mode(),
        upload_dir = %config.transfer.upload_dir.display(),
        block_symlinks = config.security.block_symlinks,
        restrict_queries = config.security.restrict_queries,
        "Starting flatbridge"
    );
    let methods = Arc::new(RpcMethods::new(connector, &config));

    match args.command {
        Command::Stdio => {
            serve_lines(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), &methods).await?;
        }
        Command::Serve { listen } => {
            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .with_context(|| format!("binding {}", listen))?;
            info!(%listen, "Listening");
            axum::serve(listener, router(methods))
                .with_graceful_shutdown(interrupted())
                .await?;
        }
    }
    info!("Stopped");
    Ok(())
}

fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn interrupted() {
    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term => {}
    }
    info!("Shutdown requested");
}
