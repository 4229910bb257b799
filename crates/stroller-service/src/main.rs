//! Stroller Service - MQTT telemetry bus and HTTP API.
//!
//! Run with: `cargo run -p stroller-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use stroller_service::{AppState, Config, TelemetryBus, api, config, middleware, ws};
use stroller_store::Store;

/// Stroller Service - MQTT telemetry bus and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "stroller-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the telemetry bus (API only mode).
    #[arg(long)]
    no_bus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stroller_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration, remembering where it came from so directory
    // changes made over the API can be saved back.
    let (mut config, config_path) = match &args.config {
        Some(path) => (Config::load_validated(path)?, Some(path.clone())),
        None => {
            let path = config::default_config_path();
            if path.exists() {
                (Config::load_validated(&path)?, Some(path))
            } else {
                (Config::default(), None)
            }
        }
    };

    // CLI flags win over file values
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }

    if config.security.api_token.is_none() {
        warn!("No API token configured; the API is open to anyone who can reach it");
    }

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?;

    let security = Arc::new(config.security.clone());

    let state = AppState::new(store, config.clone());
    if let Some(path) = config_path {
        state.set_config_path(path).await;
    }

    // Bring persisted device state back into memory
    let hydrated = state.registry.hydrate().await?;
    if hydrated > 0 {
        info!(devices = hydrated, "restored persisted device state");
        // Reopen subscriptions so telemetry resumes without a new
        // initialize call; the bus picks these up on its first ConnAck.
        for device_id in state.registry.device_ids().await {
            state.connections.open(&device_id).await;
        }
    }

    if args.no_bus {
        info!("Telemetry bus disabled");
    } else if config.mqtt.enabled {
        let bus = TelemetryBus::new(Arc::clone(&state));
        bus.start().await;
    } else {
        info!("Telemetry bus disabled by config");
    }

    let app = Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(from_fn_with_state(security, middleware::api_token_auth))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = config.server.bind.parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
