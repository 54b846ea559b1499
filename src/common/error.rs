//! Error types for meshcache

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] bincode::Error),

    // === Membership Errors ===
    #[error("Failed to join cluster via {seed}: {reason}")]
    Join { seed: String, reason: String },

    #[error("Gossip read failed: {0}")]
    GossipRead(String),

    // === Routing Errors ===
    #[error("No peers in the hash ring")]
    NoPeers,

    #[error("Peer {peer} failed: {reason}")]
    RemoteTransport { peer: String, reason: String },

    // === Cache Errors ===
    #[error("Fill failed: {0}")]
    Fill(#[from] FillError),

    #[error("Unknown cache group: {0}")]
    UnknownGroup(String),

    #[error("Cache group already registered: {0}")]
    DuplicateGroup(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a failed fill, shared by every caller coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FillError(pub String);

impl FillError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Remote failures are not: ownership is deterministic, so a retry
    /// would hit the same owner.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::GossipRead(_) | Error::Timeout(_))
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::UnknownGroup(_) => StatusCode::NOT_FOUND,
            Error::InvalidKey(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::NoPeers => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::RemoteTransport { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
