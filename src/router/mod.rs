//! Peer routing
//!
//! The router owns the consistent-hash ring of peer endpoints. A new ring is
//! built off to the side and published with a single handle swap, so readers
//! always see a complete ring, either the previous one or the new one.

pub mod reconcile;

pub use reconcile::{ReconcileHandle, Reconciler};

use crate::common::config::NAME_PLACEHOLDER;
use crate::common::lock::{rw_read, rw_write};
use crate::common::metrics::Counter;
use crate::common::{ConsistentHashRing, Error, Result};
use std::sync::{Arc, RwLock};

const SOURCE: &str = "router";

/// Base URL of a node's cache service, e.g. `http://app1:8080`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerEndpoint(String);

impl PeerEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into().trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic node name → endpoint transform
#[derive(Debug, Clone)]
pub struct PeerUrlTemplate(String);

impl PeerUrlTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(NAME_PLACEHOLDER) {
            return Err(Error::InvalidConfig(format!(
                "peer url template {:?} lacks {}",
                template, NAME_PLACEHOLDER
            )));
        }
        Ok(Self(template))
    }

    pub fn endpoint(&self, name: &str) -> PeerEndpoint {
        PeerEndpoint::new(self.0.replace(NAME_PLACEHOLDER, name))
    }
}

/// Consistent-hash router over the current peer set
pub struct PeerRouter {
    self_endpoint: PeerEndpoint,
    replicas: usize,
    ring: RwLock<Arc<ConsistentHashRing>>,
    updates: Counter,
}

impl PeerRouter {
    pub fn new(self_endpoint: PeerEndpoint, replicas: usize) -> Self {
        Self {
            self_endpoint,
            replicas,
            ring: RwLock::new(Arc::new(ConsistentHashRing::empty())),
            updates: Counter::new(),
        }
    }

    pub fn self_endpoint(&self) -> &PeerEndpoint {
        &self.self_endpoint
    }

    pub fn is_self(&self, endpoint: &PeerEndpoint) -> bool {
        *endpoint == self.self_endpoint
    }

    /// Replace the peer set wholesale
    pub fn set_peers<I>(&self, peers: I)
    where
        I: IntoIterator<Item = PeerEndpoint>,
    {
        let ring = ConsistentHashRing::new(self.replicas, peers.into_iter().map(|p| p.0));
        *rw_write(&self.ring, SOURCE, "set_peers") = Arc::new(ring);
        self.updates.inc();
    }

    /// Owner of a key; never defaults to self when the ring is empty
    pub fn owner_of(&self, key: &str) -> Result<PeerEndpoint> {
        let ring = self.current();
        ring.get(key)
            .map(|owner| PeerEndpoint(owner.to_string()))
            .ok_or(Error::NoPeers)
    }

    /// Installed peers, sorted
    pub fn peers(&self) -> Vec<PeerEndpoint> {
        self.current()
            .nodes()
            .iter()
            .map(|n| PeerEndpoint(n.clone()))
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.current().len()
    }

    /// Number of peer-set replacements since startup
    pub fn update_count(&self) -> u64 {
        self.updates.get()
    }

    fn current(&self) -> Arc<ConsistentHashRing> {
        rw_read(&self.ring, SOURCE, "current").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(names: &[&str]) -> Vec<PeerEndpoint> {
        let template = PeerUrlTemplate::new("http://{name}:8080").unwrap();
        names.iter().map(|n| template.endpoint(n)).collect()
    }

    #[test]
    fn test_template() {
        let template = PeerUrlTemplate::new("http://{name}:8080/").unwrap();
        assert_eq!(template.endpoint("app1").as_str(), "http://app1:8080");
        assert!(PeerUrlTemplate::new("http://fixed:8080").is_err());
    }

    #[test]
    fn test_empty_router_has_no_owner() {
        let router = PeerRouter::new(PeerEndpoint::new("http://app1:8080"), 50);
        assert!(matches!(router.owner_of("42"), Err(Error::NoPeers)));
    }

    #[test]
    fn test_owner_is_a_current_peer() {
        let router = PeerRouter::new(PeerEndpoint::new("http://app1:8080"), 50);
        let peers = endpoints(&["app1", "app2", "app3"]);
        router.set_peers(peers.clone());

        for i in 0..100 {
            let owner = router.owner_of(&i.to_string()).unwrap();
            assert!(peers.contains(&owner));
        }
        assert_eq!(router.peer_count(), 3);
        assert_eq!(router.update_count(), 1);
    }

    #[test]
    fn test_routers_agree_on_ownership() {
        let peers = endpoints(&["app1", "app2", "app3"]);
        let routers: Vec<PeerRouter> = peers
            .iter()
            .map(|me| {
                let router = PeerRouter::new(me.clone(), 50);
                let mut shuffled = peers.clone();
                shuffled.rotate_left(peers.iter().position(|p| p == me).unwrap());
                router.set_peers(shuffled);
                router
            })
            .collect();

        for i in 0..200 {
            let key = i.to_string();
            let owner = routers[0].owner_of(&key).unwrap();
            for router in &routers[1..] {
                assert_eq!(router.owner_of(&key).unwrap(), owner);
            }
        }
    }

    #[test]
    fn test_removed_peer_never_owns() {
        let router = PeerRouter::new(PeerEndpoint::new("http://app1:8080"), 50);
        router.set_peers(endpoints(&["app1", "app2", "app3"]));
        router.set_peers(endpoints(&["app1", "app2"]));

        let gone = endpoints(&["app3"]).remove(0);
        for i in 0..500 {
            assert_ne!(router.owner_of(&i.to_string()).unwrap(), gone);
        }
        assert_eq!(router.peers(), endpoints(&["app1", "app2"]));
    }

    #[test]
    fn test_concurrent_readers_see_complete_rings() {
        let router = Arc::new(PeerRouter::new(PeerEndpoint::new("http://app1:8080"), 50));
        let small = endpoints(&["app1", "app2"]);
        let large = endpoints(&["app1", "app2", "app3", "app4"]);
        router.set_peers(small.clone());

        let reader = {
            let router = router.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let count = router.peer_count();
                    assert!(count == 2 || count == 4, "saw partial ring of {}", count);
                }
            })
        };

        for i in 0..200 {
            if i % 2 == 0 {
                router.set_peers(large.clone());
            } else {
                router.set_peers(small.clone());
            }
        }

        reader.join().unwrap();
    }
}
