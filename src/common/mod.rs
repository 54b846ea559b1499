//! Common utilities and types shared across meshcache

pub mod config;
pub mod error;
pub mod hash;
pub(crate) mod lock;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, GossipConfig};
pub use error::{Error, FillError, Result};
pub use hash::{ring_hash, ConsistentHashRing};
pub use utils::{encode_key, format_bytes, timestamp_now_millis, validate_key};
