//! Named cache groups
//!
//! A group is an isolated key space with its own getter (fill function),
//! store and counters. Groups are registered once per process and looked up
//! by name from the peer endpoint.

use super::store::{CacheStore, Filled};
use crate::common::lock::{rw_read, rw_write};
use crate::common::metrics::Counter;
use crate::common::{format_bytes, Error, FillError, Result};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

const SOURCE: &str = "cache::group";

/// Computes the value of a key on a local cache miss
pub trait Getter: Send + Sync + 'static {
    fn get(&self, key: &str) -> BoxFuture<'static, std::result::Result<Filled, FillError>>;
}

impl<F, Fut> Getter for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Filled, FillError>> + Send + 'static,
{
    fn get(&self, key: &str) -> BoxFuture<'static, std::result::Result<Filled, FillError>> {
        Box::pin(self(key.to_string()))
    }
}

/// Point-in-time group counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub gets: u64,
    pub hits: u64,
    pub local_loads: u64,
    pub peer_loads: u64,
    pub coalesced: u64,
    pub errors: u64,
    pub evictions: u64,
    pub entries: u64,
    pub bytes: u64,
}

pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    store: Arc<CacheStore>,
    gets: Counter,
    hits: Counter,
    peer_loads: Counter,
    errors: Counter,
}

impl Group {
    pub fn new(name: impl Into<String>, cache_bytes: u64, getter: Arc<dyn Getter>) -> Self {
        Self {
            name: name.into(),
            getter,
            store: Arc::new(CacheStore::new(cache_bytes)),
            gets: Counter::new(),
            hits: Counter::new(),
            peer_loads: Counter::new(),
            errors: Counter::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Serve a key this node owns: cached value, or a coalesced local fill
    pub async fn load_local(&self, key: &str) -> Result<Bytes> {
        self.gets.inc();

        if let Some(value) = self.store.get(key) {
            self.hits.inc();
            return Ok(value);
        }

        let getter = self.getter.clone();
        let owned_key = key.to_string();
        let result = self
            .store
            .fill(key, move || getter.get(&owned_key))
            .await;

        if let Err(e) = &result {
            self.errors.inc();
            tracing::error!(group = %self.name, key, error = %e, "Fill failed");
        }

        result
    }

    /// Count a lookup answered by the owning peer
    pub fn record_peer_load(&self, ok: bool) {
        self.gets.inc();
        self.peer_loads.inc();
        if !ok {
            self.errors.inc();
        }
    }

    pub fn stats(&self) -> GroupStats {
        GroupStats {
            gets: self.gets.get(),
            hits: self.hits.get(),
            local_loads: self.store.loads(),
            peer_loads: self.peer_loads.get(),
            coalesced: self.store.coalesced(),
            errors: self.errors.get(),
            evictions: self.store.evictions(),
            entries: self.store.len() as u64,
            bytes: self.store.bytes(),
        }
    }
}

/// Process-wide group registry
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a group; names must be unique
    pub fn register<G: Getter>(
        &self,
        name: &str,
        cache_bytes: u64,
        getter: G,
    ) -> Result<Arc<Group>> {
        let mut groups = rw_write(&self.groups, SOURCE, "register");
        if groups.contains_key(name) {
            return Err(Error::DuplicateGroup(name.to_string()));
        }

        let group = Arc::new(Group::new(name, cache_bytes, Arc::new(getter)));
        groups.insert(name.to_string(), group.clone());
        tracing::info!(group = name, budget = %format_bytes(cache_bytes), "Registered cache group");
        Ok(group)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Group>> {
        rw_read(&self.groups, SOURCE, "get")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownGroup(name.to_string()))
    }

    /// All groups, sorted by name
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = rw_read(&self.groups, SOURCE, "groups")
            .values()
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn counting_getter(calls: Arc<AtomicUsize>) -> impl Getter {
        move |key: String| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FillError>(Filled::new(
                    format!("value-{}", key),
                    Some(Instant::now() + Duration::from_secs(60)),
                ))
            }
        }
    }

    #[tokio::test]
    async fn test_second_load_is_a_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let group = Group::new("users", 1 << 20, Arc::new(counting_getter(calls.clone())));

        assert_eq!(group.load_local("7").await.unwrap(), Bytes::from("value-7"));
        assert_eq!(group.load_local("7").await.unwrap(), Bytes::from("value-7"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = group.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.local_loads, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_fill_error_counted() {
        let group = Group::new(
            "broken",
            1024,
            Arc::new(|_key: String| async { Err::<Filled, _>(FillError::new("no backend")) }),
        );

        assert!(matches!(group.load_local("1").await, Err(Error::Fill(_))));
        assert_eq!(group.stats().errors, 1);
        assert_eq!(group.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = GroupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register("users", 1024, counting_getter(calls.clone()))
            .unwrap();

        assert!(matches!(
            registry.register("users", 1024, counting_getter(calls)),
            Err(Error::DuplicateGroup(_))
        ));
        assert!(registry.get("users").is_ok());
        assert!(matches!(registry.get("posts"), Err(Error::UnknownGroup(_))));
        assert_eq!(registry.groups().len(), 1);
    }
}
