use clap::{Parser, Subcommand};
use relcheck::config::NodeConfig;
use relcheck::ring::HashRing;
use relcheck::{CheckRequest, SubjectRef};
use relcheck_cli::api_client::ApiClient;
use relcheck_http::models::{CheckRequestBody, ConsistencyParam, PeerInfo, RingOwnerResponse};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Node URL
    #[arg(
        long,
        short = 'u',
        default_value = "http://localhost:7070",
        env = "RELCHECK_URL",
        global = true
    )]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a relation, e.g. `document:1#viewer`
    Check {
        /// `type:id#relation`, optionally followed by `@subject`
        check: String,

        /// Subject as `type:id` or `type:id#relation`
        #[arg(short, long)]
        subject: Option<String>,

        /// Bypass the result cache
        #[arg(long)]
        fully_consistent: bool,
    },

    /// Show the node that owns an object
    Owner {
        object_id: String,

        /// Compute offline from a node config instead of asking the node
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show result cache statistics of the node
    Stats,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check_body(
    check: &str,
    subject: Option<&str>,
    fully_consistent: bool,
) -> Result<CheckRequestBody, Box<dyn std::error::Error>> {
    let mut request: CheckRequest = check.parse()?;
    if let Some(subject) = subject {
        request = request.with_subject(subject.parse::<SubjectRef>()?);
    }
    Ok(CheckRequestBody {
        object_type: request.object_type,
        object_id: request.object_id,
        relation: request.relation,
        subject: request.subject.map(|s| s.to_string()),
        consistency: if fully_consistent {
            ConsistencyParam::FullyConsistent
        } else {
            ConsistencyParam::MinimizeLatency
        },
    })
}

fn owner_offline(
    config: &Path,
    object_id: &str,
) -> Result<RingOwnerResponse, Box<dyn std::error::Error>> {
    let node = NodeConfig::from_file(config)?;
    let local = node.local_peer();
    let ring = HashRing::with_peers(
        node.ring.virtual_nodes,
        node.peers.iter().cloned().chain(std::iter::once(local.clone())),
    );
    let owner = ring.owner_of(object_id.as_bytes())?.clone();
    Ok(RingOwnerResponse {
        object_id: object_id.to_string(),
        is_local: owner.id == local.id,
        ring_size: ring.len(),
        owner: PeerInfo::from(owner),
    })
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Check {
            check,
            subject,
            fully_consistent,
        } => {
            let body = check_body(check, subject.as_deref(), *fully_consistent)?;
            debug!(url = %cli.url, "sending check");
            let response = ApiClient::new(&cli.url).check(&body).await?;
            print_json(&response)
        }
        Commands::Owner { object_id, config } => {
            let response = match config {
                Some(path) => owner_offline(path, object_id)?,
                None => ApiClient::new(&cli.url).ring_owner(object_id).await?,
            };
            print_json(&response)
        }
        Commands::Stats => print_json(&ApiClient::new(&cli.url).cache_stats().await?),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
