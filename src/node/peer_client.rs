use crate::common::{encode_key, Error, Result};
use crate::router::PeerEndpoint;
use bytes::Bytes;

/// HTTP client for the peer cache endpoint
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    base_path: String,
}

impl PeerClient {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_path: base_path.into(),
        }
    }

    /// URL of `group/key` on a peer
    pub fn url(&self, peer: &PeerEndpoint, group: &str, key: &str) -> String {
        format!(
            "{}{}{}/{}",
            peer,
            self.base_path,
            encode_key(group),
            encode_key(key)
        )
    }

    /// Ask the owning peer for a value. Any non-2xx answer is a failure.
    pub async fn fetch(&self, peer: &PeerEndpoint, group: &str, key: &str) -> Result<Bytes> {
        let url = self.url(peer, group, key);
        tracing::debug!(%url, "Peer request");

        let remote = |reason: String| Error::RemoteTransport {
            peer: peer.to_string(),
            reason,
        };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(remote(format!("status {}: {}", status.as_u16(), body.trim())));
        }

        response.bytes().await.map_err(|e| remote(e.to_string()))
    }
}
