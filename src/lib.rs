//! # meshcache
//!
//! A peer-aware, read-through distributed cache:
//! - Gossip membership (UDP) discovers the cluster's nodes
//! - A reconciliation loop turns membership into a consistent-hash ring
//! - Each key has exactly one owner, which fills it once and caches it
//! - Concurrent misses for a key share a single fill
//! - Non-owners forward lookups to the owner over HTTP
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  client ──► /users/:id
//!               │
//!        ┌──────▼───────┐   owner_of(key)   ┌──────────────┐
//!        │ Coordinator  ├──────────────────►│ PeerRouter   │◄── Reconciler
//!        └──┬────────┬──┘                   │ (hash ring)  │        ▲
//!      self │        │ remote               └──────────────┘        │ snapshot
//!   ┌───────▼──┐  ┌──▼───────────────┐                       ┌──────┴──────┐
//!   │ Group    │  │ GET /_cache/g/k  │──► owning node        │ Gossip      │
//!   │ + Store  │  │ (PeerClient)     │                       │ membership  │
//!   └──────────┘  └──────────────────┘                       └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a seed node
//! ```bash
//! meshcache serve --name app1 --http 0.0.0.0:8080 --gossip 0.0.0.0:7946
//! ```
//!
//! ### Join more nodes
//! ```bash
//! meshcache serve --name app2 --seed app1:7946
//! meshcache serve --name app3 --seed app1:7946
//! ```
//!
//! ### Look up a user
//! ```bash
//! curl http://app2:8080/users/42
//! ```

pub mod cache;
pub mod common;
pub mod demo;
pub mod membership;
pub mod node;
pub mod router;

// Re-export commonly used types
pub use cache::{Filled, GroupRegistry};
pub use common::{Config, Error, FillError, Result};
pub use node::{Node, NodeHandle};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
