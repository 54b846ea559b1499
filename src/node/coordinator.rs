//! Request coordination
//!
//! Decides per key whether this node owns it. Owned keys are served from
//! the local group (coalesced fill on miss); other keys are fetched from the
//! owner and returned verbatim without being cached here. Every lookup is
//! bounded by the request deadline.

use super::peer_client::PeerClient;
use crate::cache::{Group, GroupRegistry};
use crate::common::{validate_key, Error, Result};
use crate::router::PeerRouter;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct Coordinator {
    router: Arc<PeerRouter>,
    groups: Arc<GroupRegistry>,
    client: PeerClient,
    request_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        router: Arc<PeerRouter>,
        groups: Arc<GroupRegistry>,
        client: PeerClient,
        request_timeout: Duration,
    ) -> Self {
        Self {
            router,
            groups,
            client,
            request_timeout,
        }
    }

    pub fn router(&self) -> &Arc<PeerRouter> {
        &self.router
    }

    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    /// Client lookup: route to the owner of `key`
    pub async fn lookup(&self, group: &str, key: &str) -> Result<Bytes> {
        validate_key(key)?;
        let group = self.groups.get(group)?;

        self.with_deadline(group.name(), key, self.route(&group, key))
            .await
    }

    /// Peer lookup: another node decided we own `key`, fill locally
    pub async fn serve_peer(&self, group: &str, key: &str) -> Result<Bytes> {
        validate_key(key)?;
        let group = self.groups.get(group)?;

        self.with_deadline(group.name(), key, group.load_local(key))
            .await
    }

    async fn route(&self, group: &Group, key: &str) -> Result<Bytes> {
        let owner = self.router.owner_of(key)?;

        if self.router.is_self(&owner) {
            return group.load_local(key).await;
        }

        tracing::debug!(group = group.name(), key, %owner, "Forwarding to owner");
        let result = self.client.fetch(&owner, group.name(), key).await;
        group.record_peer_load(result.is_ok());

        if let Err(e) = &result {
            tracing::warn!(group = group.name(), key, %owner, error = %e, "Peer lookup failed");
        }

        result
    }

    /// Abandoning the wait never cancels a shared fill; other waiters keep it
    async fn with_deadline<F>(&self, group: &str, key: &str, fut: F) -> Result<Bytes>
    where
        F: Future<Output = Result<Bytes>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    group,
                    key,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Lookup timed out"
                );
                Err(Error::Timeout(self.request_timeout))
            }
        }
    }
}
