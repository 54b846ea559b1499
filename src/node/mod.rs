//! Cache node: request coordination, peer transport and the HTTP server

pub mod coordinator;
pub mod http;
pub mod peer_client;
pub mod server;

pub use coordinator::Coordinator;
pub use http::{create_router, CacheState};
pub use peer_client::PeerClient;
pub use server::{Node, NodeHandle};
