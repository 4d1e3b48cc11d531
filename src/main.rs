use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatgate::agent::HttpInvokerFactory;
use chatgate::background::BackgroundTasks;
use chatgate::cache::MemorySessionCache;
use chatgate::config::Config;
use chatgate::platform::HttpConfigProvider;
use chatgate::server::{self, AppState};
use chatgate::store::MemoryMessageStore;
use chatgate::turn::TurnDeps;

// ============================================================================
// CLI Types
// ============================================================================

/// Chatgate - streaming gateway for conversational AI backends
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "chatgate.toml")]
        config: String,

        /// Host to bind to (overrides config file)
        #[arg(long)]
        host: Option<IpAddr>,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => serve(&config, host, port).await,
    }
}

async fn serve(config_path: &str, host: Option<IpAddr>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load(config_path).await?;

    // CLI overrides config
    if let Some(host) = host {
        config.server.host = host.to_string();
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let session_ttl = std::time::Duration::from_secs(config.cache.session_ttl_seconds);
    let turn = TurnDeps {
        config_provider: Arc::new(HttpConfigProvider::new(
            &config.platform.base_url,
            &config.platform.service_key,
        )),
        store: Arc::new(MemoryMessageStore::new()),
        cache: Arc::new(MemorySessionCache::new(session_ttl)),
        invokers: Arc::new(HttpInvokerFactory),
    };

    let background_tasks = BackgroundTasks::new();
    let state = AppState {
        turn,
        keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
        max_connections: config.server.max_connections,
        background_tasks: background_tasks.clone(),
    };
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight turn persistence finish before exiting.
    background_tasks.shutdown().await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
