//! Standalone debugscope server
//!
//! Hosts a recorder with its query API, observer stream and ingest endpoint,
//! so applications can ship entries over HTTP and inspect them from a browser
//! or script.
//!
//! Usage:
//! ```bash
//! # With config file
//! debugscope-server --config debugscope.yaml
//!
//! # Or with environment variables
//! DEBUGSCOPE_STORAGE_DRIVER=sqlite DEBUGSCOPE_STORAGE_CONNECTION=./scope.db debugscope-server
//! ```
//!
//! Test with:
//! ```bash
//! curl -X POST http://localhost:8085/ingest \
//!   -H "Content-Type: application/json" \
//!   -d '{"type":"log","batchId":"b1","content":{"level":"info","message":"hi"}}'
//!
//! curl "http://localhost:8085/api/entries?type=log&limit=10"
//! ```

mod app;
mod config;

use clap::Parser;
use config::ServerConfig;
use debugscope::{Scope, install_panic_hook};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// debugscope server - application debugging recorder
#[derive(Parser)]
#[command(name = "debugscope-server")]
#[command(about = "Records application debugging entries and serves them over HTTP", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "DEBUGSCOPE_CONFIG")]
    config: Option<String>,

    /// Address to bind (overrides config and environment)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and environment)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    // Environment overrides the file, CLI flags override both
    config.merge_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = cli.log_level {
        config.scope.logging.level = level;
    }

    init_tracing(&config)?;

    match cli.config {
        Some(ref path) => info!("Loaded configuration from {}", path),
        None => info!("Using default configuration"),
    }

    config.scope.validate()?;
    let scope = Scope::new(config.scope.clone())?;
    scope.start().await?;
    install_panic_hook(scope.clone());

    info!(
        "Recording to {} storage (enabled: {}, retention: {})",
        scope.storage().name(),
        scope.is_enabled(),
        if config.scope.retention.enabled {
            format!("{}h", config.scope.retention.hours)
        } else {
            "off".to_string()
        }
    );

    let app = app::router(app::AppState {
        scope: scope.clone(),
        body_limit: config.body_limit,
        ingest_max_content_kb: config.ingest_max_content_kb,
    });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("debugscope listening on http://{}", addr);
    info!("   API:       http://{}{}", addr, config.scope.api.prefix);
    info!("   Observers: ws://{}/ws", addr);
    info!("   Metrics:   http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scope.shutdown().await {
        warn!("Error while shutting down recorder: {}", e);
    }

    info!("debugscope stopped");
    Ok(())
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let log_level = match config.scope.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));

    // sqlx logs every statement at INFO; keep it quiet unless asked
    if !config.scope.logging.log_sql {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

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
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
