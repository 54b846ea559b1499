//! Configuration for meshcache nodes
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `MESHCACHE_*` environment variables. The binary applies CLI flags last.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MESHCACHE";

/// Placeholder substituted with the node name in `peer_url_template`
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cluster-unique node name (used as gossip identity)
    pub node_name: String,

    /// Bind address for the HTTP API (peer + client)
    pub http_addr: SocketAddr,

    /// Bind address for UDP gossip
    pub gossip_addr: SocketAddr,

    /// Gossip address of the seed node; `None` makes this node the seed
    pub seed: Option<String>,

    /// Template deriving a peer base URL from a node name
    pub peer_url_template: String,

    /// Base path of the peer cache endpoint
    pub base_path: String,

    /// Reconciliation poll interval
    pub poll_interval_ms: u64,

    /// Byte budget per cache group
    pub cache_bytes: u64,

    /// Per-request lookup deadline
    pub request_timeout_ms: u64,

    /// Virtual points per peer on the hash ring
    pub virtual_nodes: usize,

    /// Gossip protocol timings
    pub gossip: GossipConfig,

    /// Logging level
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    pub gossip_interval_ms: u64,
    pub failure_check_interval_ms: u64,
    pub suspect_timeout_ms: u64,
    pub dead_timeout_ms: u64,
    /// How long a dead member is remembered before it is forgotten
    pub dead_retention_ms: u64,
    pub join_timeout_ms: u64,
}

/// Kernel hostname on Linux, as seen by containers
const HOSTNAME_FILE: &str = "/etc/hostname";

/// Node name default: `HOSTNAME`, then the system hostname file, then
/// `localhost`. Set `node_name` explicitly where neither is reliable.
fn default_node_name() -> String {
    resolve_node_name(
        std::env::var("HOSTNAME").ok(),
        std::fs::read_to_string(HOSTNAME_FILE).ok(),
    )
}

fn resolve_node_name(env: Option<String>, hostname_file: Option<String>) -> String {
    [env, hostname_file]
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            gossip_addr: SocketAddr::from(([0, 0, 0, 0], 7946)),
            seed: None,
            peer_url_template: "http://{name}:8080".to_string(),
            base_path: "/_cache/".to_string(),
            poll_interval_ms: 5_000,
            cache_bytes: 3 << 20,
            request_timeout_ms: 5_000,
            virtual_nodes: 50,
            gossip: GossipConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 500,
            failure_check_interval_ms: 1_000,
            suspect_timeout_ms: 5_000,
            dead_timeout_ms: 10_000,
            dead_retention_ms: 30_000,
            join_timeout_ms: 3_000,
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(Error::InvalidConfig("node_name cannot be empty".into()));
        }
        if !self.peer_url_template.contains(NAME_PLACEHOLDER) {
            return Err(Error::InvalidConfig(format!(
                "peer_url_template must contain {}",
                NAME_PLACEHOLDER
            )));
        }
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(Error::InvalidConfig(
                "base_path must start and end with '/'".into(),
            ));
        }
        if self.poll_interval_ms == 0 || self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll and request intervals must be non-zero".into(),
            ));
        }
        if self.cache_bytes == 0 {
            return Err(Error::InvalidConfig("cache_bytes must be non-zero".into()));
        }
        if self.virtual_nodes == 0 {
            return Err(Error::InvalidConfig("virtual_nodes must be non-zero".into()));
        }
        if self.gossip.suspect_timeout_ms >= self.gossip.dead_timeout_ms {
            return Err(Error::InvalidConfig(
                "suspect timeout must be shorter than dead timeout".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl GossipConfig {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn failure_check_interval(&self) -> Duration {
        Duration::from_millis(self.failure_check_interval_ms)
    }

    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.suspect_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }

    pub fn dead_retention(&self) -> Duration {
        Duration::from_millis(self.dead_retention_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
