//! Cache node binary

use clap::{Parser, Subcommand};
use meshcache::{demo, Config, GroupRegistry, Node};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "meshcache")]
#[command(about = "Peer-aware distributed read-through cache")]
#[command(version = meshcache::BUILD_INFO)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cache node
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node name, unique in the cluster
        #[arg(long)]
        name: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        http: Option<SocketAddr>,

        /// Bind address for gossip
        #[arg(long)]
        gossip: Option<SocketAddr>,

        /// Gossip address of the seed node
        #[arg(long)]
        seed: Option<String>,

        /// Peer URL template, e.g. http://{name}:8080
        #[arg(long)]
        peer_template: Option<String>,

        /// Byte budget of the users group
        #[arg(long)]
        cache_bytes: Option<u64>,

        /// Log level (overridden by RUST_LOG)
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            name,
            http,
            gossip,
            seed,
            peer_template,
            cache_bytes,
            log_level,
        } => {
            // File and environment first, CLI flags win
            let mut config = Config::load(config.as_deref())?;
            if let Some(name) = name {
                config.node_name = name;
            }
            if let Some(http) = http {
                config.http_addr = http;
            }
            if let Some(gossip) = gossip {
                config.gossip_addr = gossip;
            }
            if seed.is_some() {
                config.seed = seed;
            }
            if let Some(template) = peer_template {
                config.peer_url_template = template;
            }
            if let Some(bytes) = cache_bytes {
                config.cache_bytes = bytes;
            }
            if let Some(level) = log_level {
                config.log_level = level;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let groups = Arc::new(GroupRegistry::new());
            groups.register(
                demo::USERS_GROUP,
                config.cache_bytes,
                demo::users_getter(config.node_name.clone()),
            )?;

            let node = Node::new(config, groups).start().await?;
            node.run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
                tracing::info!("Ctrl-C received");
            })
            .await?;
        }
    }

    Ok(())
}
