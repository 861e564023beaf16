use std::net::SocketAddr;
use std::sync::Arc;

use relcheck::config::{ConfigError, NodeConfig};
use relcheck::Pipeline;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::client::HttpPeerClient;
use crate::routes::create_api_router;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Dispatch node configuration
    pub node: NodeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
            node: NodeConfig::default(),
        }
    }
}

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Builds the node pipeline, talking to peers over HTTP.
    pub fn from_config(config: &NodeConfig) -> Result<Self, ConfigError> {
        let pipeline = Pipeline::from_config(config, Arc::new(HttpPeerClient::new()))?;
        Ok(Self::new(Arc::new(pipeline)))
    }
}

/// Serve the API on an already bound listener until the process is stopped
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Start the HTTP server
pub async fn start_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::from_config(&config.node)?;
    info!(
        node = %state.pipeline.local_peer(),
        peers = state.pipeline.membership().peers().len(),
        "Initialized dispatch pipeline"
    );

    let addr = format!("{}:{}", config.host, config.port).parse::<SocketAddr>()?;
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await
        }
    }
}
