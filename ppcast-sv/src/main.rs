//! ppcast-sv - Main entry point
//!
//! Serves Plex playlists as a single seekable MP3 stream plus a podcast
//! feed pointing at it.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use ppcast_common::config::{
    load_toml_config, resolve_config_path, ConfigOverrides, LoggingConfig, CONFIG_ENV_VAR,
};
use ppcast_common::db::init_database;
use ppcast_sv::catalog::{MediaCatalog, PlexClient};
use ppcast_sv::completion::{CompletionTracker, DedupStore, SqliteDedupStore};
use ppcast_sv::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for ppcast-sv
#[derive(Parser, Debug)]
#[command(name = "ppcast-sv")]
#[command(about = "Plex playlists as one seekable podcast stream")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PPCAST_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "PPCAST_BIND")]
    bind: Option<String>,

    /// Public base URL used in feed links
    #[arg(long, env = "PPCAST_BASE_URL")]
    base_url: Option<String>,

    /// Plex server URL
    #[arg(long, env = "PPCAST_PLEX_URL")]
    plex_url: Option<String>,

    /// Plex authentication token
    #[arg(long, env = "PPCAST_PLEX_TOKEN", hide_env_values = true)]
    plex_token: Option<String>,

    /// Completion database path
    #[arg(long, env = "PPCAST_DATABASE")]
    database: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            bind_address: self.bind.clone(),
            base_url: self.base_url.clone(),
            plex_url: self.plex_url.clone(),
            plex_token: self.plex_token.clone(),
            database_path: self.database.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // clap already read PPCAST_CONFIG into args.config
    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let mut config = load_toml_config(config_path.as_deref())?;
    config.apply_overrides(&args.overrides());

    init_tracing(&config.logging)?;

    info!("Starting ppcast-sv v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("Config file: none (built-in defaults)"),
    }

    config.validate().context("Invalid configuration")?;

    let base_url = config.resolved_base_url();
    let database_path = config.resolved_database_path();
    let server_identity = config.resolved_server_identity();

    info!("Plex server: {}", config.plex.url);
    info!(
        "Plex token: {}",
        if config.plex.token.is_empty() { "(none)" } else { "(set)" }
    );
    info!("Public base URL: {}", base_url);
    info!("Database: {}", database_path.display());
    info!(
        "Completion: threshold={:?}, window={}s, lock ttl={}s",
        config.completion.threshold, config.completion.window_secs, config.completion.lock_ttl_secs
    );
    if config.plex.accept_invalid_certs {
        warn!("TLS certificate verification disabled for Plex");
    }

    let pool = init_database(&database_path)
        .await
        .context("Failed to initialize database")?;

    let catalog: Arc<dyn MediaCatalog> =
        Arc::new(PlexClient::new(&config.plex).context("Failed to create Plex client")?);
    let store: Arc<dyn DedupStore> = Arc::new(SqliteDedupStore::new(pool));
    let tracker = Arc::new(CompletionTracker::new(
        Arc::clone(&catalog),
        store,
        server_identity,
        &config.completion,
    ));

    let state = AppState::new(catalog, tracker, &config.stream, base_url);
    let app = build_router(state);

    let ip = config
        .bind_address
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid bind address: {}", config.bind_address))?;
    let addr = SocketAddr::new(ip, config.port);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing: `RUST_LOG` wins, else the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ppcast_sv={level},ppcast_common={level},tower_http={level}",
            level = logging.level
        ))
    });

    let (stderr_layer, file_layer) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
