use clap::Parser;
use relcheck::config::NodeConfig;
use relcheck_http::server::ServerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// relcheck dispatch node
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "RELCHECK_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 7070, env = "RELCHECK_PORT")]
    port: u16,

    /// Node configuration file (JSON)
    #[arg(short, long, env = "RELCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let node = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from file: {}", path.display());
            NodeConfig::from_file(path)?
        }
        None => NodeConfig {
            advertise_addr: format!("{}:{}", cli.host, cli.port),
            ..NodeConfig::default()
        },
    };

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        node,
    };
    relcheck_http::start_with_config(config).await
}
