//! relcheck HTTP node
//!
//! Exposes a relcheck dispatch pipeline over HTTP: the inbound check API for
//! clients, the peer dispatch endpoint other nodes forward checks to, and the
//! [`client::HttpPeerClient`] this node uses to forward its own.

pub mod client;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

use server::{ServerConfig, start_server};

/// Start a node with the default configuration
pub async fn start() -> Result<(), Box<dyn std::error::Error>> {
    start_server(ServerConfig::default()).await
}

/// Start a node with a custom configuration
pub async fn start_with_config(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    start_server(config).await
}
