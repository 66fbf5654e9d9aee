use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use axum::Router;
use clap::Parser;
use http::{Method, header::CONTENT_TYPE};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::anyhow;

use realtime_relay::{
    CommandQueue, DispatcherThread, RelayBridge, ServerConfig, SessionDispatcher,
    SessionRegistry, core::realtime::OpenAIRealtimeConnector, handlers::relay::ClientHub,
    routes, state::AppState,
};

/// Realtime relay - bridges client audio sockets to a realtime speech service
#[derive(Parser, Debug)]
#[command(name = "realtime-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Must happen before the first outbound TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let realtime_config = config
        .realtime_config()
        .map_err(|e| anyhow!(e.to_string()))?;
    let connector = Arc::new(
        OpenAIRealtimeConnector::new(realtime_config).map_err(|e| anyhow!(e.to_string()))?,
    );

    // Relay core: registry and queue are shared with the transport, the
    // dispatcher owns every streaming session on its own thread
    let registry = Arc::new(SessionRegistry::new());
    let (commands, command_rx) = CommandQueue::unbounded();
    let hub = Arc::new(ClientHub::new());

    let dispatcher = SessionDispatcher::new(command_rx, registry.clone(), connector, hub.clone())
        .with_options(config.session_options())
        .with_shutdown_timeout(config.shutdown_timeout());
    let dispatcher_thread = DispatcherThread::spawn(dispatcher)
        .map_err(|e| anyhow!("Failed to start session dispatcher: {}", e))?;

    let bridge = RelayBridge::new(registry, commands);
    let app_state = AppState::new(bridge.clone(), hub);

    let cors_layer = match config.cors_allowed_origins.as_deref() {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE]),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE])
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            CorsLayer::new()
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE])
        }
    };

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app: Router = routes::api::create_api_router()
        .merge(routes::relay::create_relay_router())
        .with_state(app_state)
        .layer(cors_layer)
        .layer(security_headers);

    let address = config.address();
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!("Server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(bridge.clone()))
        .await?;

    // Idempotent: the signal handler has normally submitted it already
    let _ = bridge.shutdown();
    let clean = tokio::task::spawn_blocking(move || dispatcher_thread.join()).await?;
    if !clean {
        warn!("Session dispatcher exited abnormally");
    }

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C after asking the dispatcher to close every session.
async fn shutdown_signal(bridge: RelayBridge) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    if let Err(e) = bridge.shutdown() {
        warn!("Failed to submit shutdown: {}", e);
    }
}
