//! Cache storage with expiration, a byte budget and coalesced fills.
//!
//! Entries past their expiration are misses and are dropped when touched.
//! When the byte budget is exceeded the least recently used entries go.
//!
//! Concurrent fills of one key share a single computation: the first
//! caller registers an in-flight fill, later callers attach to it. The
//! computation runs on its own task, so a caller that stops waiting does
//! not cancel it for the others. Cache insertion and registry removal
//! happen under the registry lock, making fills linearizable per key.

use crate::common::lock::mutex_lock;
use crate::common::metrics::Counter;
use crate::common::{Error, FillError, Result};
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

const SOURCE: &str = "cache::store";

/// Result of a fill computation
#[derive(Debug, Clone)]
pub struct Filled {
    pub value: Bytes,
    /// Absolute expiration; `None` keeps the entry until evicted
    pub expires_at: Option<Instant>,
}

impl Filled {
    pub fn new(value: impl Into<Bytes>, expires_at: Option<Instant>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    size: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

fn entry_size(key: &str, value: &Bytes) -> u64 {
    (key.len() + value.len()) as u64
}

type SharedFill = Shared<BoxFuture<'static, std::result::Result<Bytes, FillError>>>;

struct Table {
    entries: LruCache<String, CacheEntry>,
    bytes: u64,
}

impl Table {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.bytes -= entry.size;
        Some(entry)
    }
}

/// Owned by a fill task. If the task ends without completing (the compute
/// panicked or the task was aborted) the key's registry entry is cleared so
/// the next caller starts a fresh fill.
struct FlightGuard {
    store: Arc<CacheStore>,
    key: String,
    completed: bool,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::warn!(key = %self.key, "Fill ended without completing");
        mutex_lock(&self.store.in_flight, SOURCE, "abandon").remove(&self.key);
    }
}

pub struct CacheStore {
    max_bytes: u64,
    table: Mutex<Table>,
    in_flight: Mutex<HashMap<String, SharedFill>>,
    loads: Counter,
    coalesced: Counter,
    evictions: Counter,
}

impl CacheStore {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            table: Mutex::new(Table {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            in_flight: Mutex::new(HashMap::new()),
            loads: Counter::new(),
            coalesced: Counter::new(),
            evictions: Counter::new(),
        }
    }

    /// Look up a live entry, dropping it if expired
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut table = mutex_lock(&self.table, SOURCE, "get");

        match table.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }

        tracing::trace!(key, "Expired entry dropped");
        table.remove(key);
        None
    }

    /// Return the cached value or compute it, coalescing concurrent callers.
    pub async fn fill<F, Fut>(self: &Arc<Self>, key: &str, compute: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Filled, FillError>> + Send + 'static,
    {
        let flight = {
            let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "fill");

            if let Some(value) = self.get(key) {
                return Ok(value);
            }

            match in_flight.get(key) {
                Some(flight) => {
                    self.coalesced.inc();
                    flight.clone()
                }
                None => {
                    self.loads.inc();
                    let flight = self.start_fill(key.to_string(), compute());
                    in_flight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        flight.await.map_err(Error::Fill)
    }

    fn start_fill<Fut>(self: &Arc<Self>, key: String, compute: Fut) -> SharedFill
    where
        Fut: Future<Output = std::result::Result<Filled, FillError>> + Send + 'static,
    {
        let mut guard = FlightGuard {
            store: self.clone(),
            key,
            completed: false,
        };
        let task = tokio::spawn(async move {
            let outcome = compute.await;
            let result = guard.store.complete(&guard.key, outcome);
            guard.completed = true;
            result
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(FillError::new(format!("fill task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    fn complete(
        &self,
        key: &str,
        outcome: std::result::Result<Filled, FillError>,
    ) -> std::result::Result<Bytes, FillError> {
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "complete");

        if let Ok(filled) = &outcome {
            self.insert(key, filled.value.clone(), filled.expires_at);
        }
        in_flight.remove(key);

        outcome.map(|filled| filled.value)
    }

    /// Insert an entry, evicting least recently used entries over budget
    pub fn insert(&self, key: &str, value: Bytes, expires_at: Option<Instant>) {
        let now = Instant::now();
        let size = entry_size(key, &value);
        let mut table = mutex_lock(&self.table, SOURCE, "insert");

        table.remove(key);

        if matches!(expires_at, Some(at) if now >= at) {
            return;
        }
        if size > self.max_bytes {
            tracing::debug!(key, size, budget = self.max_bytes, "Entry exceeds cache budget, not cached");
            return;
        }

        table.entries.put(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                expires_at,
                size,
            },
        );
        table.bytes += size;

        while table.bytes > self.max_bytes {
            match table.entries.pop_lru() {
                Some((evicted, entry)) => {
                    table.bytes -= entry.size;
                    self.evictions.inc();
                    tracing::trace!(key = %evicted, "Evicted least recently used entry");
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        mutex_lock(&self.table, SOURCE, "remove").remove(key)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.table, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held
    pub fn bytes(&self) -> u64 {
        mutex_lock(&self.table, SOURCE, "bytes").bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Computations started
    pub fn loads(&self) -> u64 {
        self.loads.get()
    }

    /// Callers that attached to an in-flight fill
    pub fn coalesced(&self) -> u64 {
        self.coalesced.get()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.get()
    }

    pub fn in_flight(&self) -> usize {
        mutex_lock(&self.in_flight, SOURCE, "in_flight").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_insert_and_get() {
        let store = CacheStore::new(1024);
        store.insert("key1", Bytes::from_static(b"value1"), None);

        assert_eq!(store.get("key1").unwrap(), Bytes::from_static(b"value1"));
        assert!(store.get("missing").is_none());
        assert_eq!(store.bytes(), 10);
    }

    #[test]
    fn test_replace_accounts_bytes() {
        let store = CacheStore::new(1024);
        store.insert("k", Bytes::from_static(b"aaaa"), None);
        store.insert("k", Bytes::from_static(b"bb"), None);
        assert_eq!(store.bytes(), 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_boundary() {
        let store = CacheStore::new(1024);
        let expires_at = Instant::now() + Duration::from_secs(60);
        store.insert("user", Bytes::from_static(b"alice"), Some(expires_at));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get("user").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("user").is_none());
        // lazily removed
        assert_eq!(store.len(), 0);
        assert_eq!(store.bytes(), 0);
    }

    #[test]
    fn test_lru_eviction_under_budget() {
        // Each entry is 2 + 8 = 10 bytes
        let store = CacheStore::new(30);
        store.insert("k1", Bytes::from(vec![0u8; 8]), None);
        store.insert("k2", Bytes::from(vec![0u8; 8]), None);
        store.insert("k3", Bytes::from(vec![0u8; 8]), None);

        // Touch k1 so k2 becomes least recently used
        assert!(store.get("k1").is_some());
        store.insert("k4", Bytes::from(vec![0u8; 8]), None);

        assert!(store.get("k2").is_none());
        assert!(store.get("k1").is_some());
        assert!(store.get("k3").is_some());
        assert!(store.get("k4").is_some());
        assert_eq!(store.bytes(), 30);
        assert_eq!(store.evictions(), 1);
    }

    #[test]
    fn test_oversized_entry_not_cached() {
        let store = CacheStore::new(8);
        store.insert("big", Bytes::from(vec![0u8; 64]), None);
        assert!(store.is_empty());
        assert_eq!(store.bytes(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_fills_compute_once() {
        let store = Arc::new(CacheStore::new(1024));
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = tokio::sync::watch::channel(false);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let calls = calls.clone();
            let mut gate = gate.clone();
            handles.push(tokio::spawn(async move {
                store
                    .fill("7", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = gate.wait_for(|open| *open).await;
                        Ok::<_, FillError>(Filled::new(Bytes::from_static(b"seven"), None))
                    })
                    .await
            }));
        }

        // Let every caller register before the fill completes
        while store.loads() + store.coalesced() < 16 {
            tokio::task::yield_now().await;
        }
        release.send_replace(true);

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Bytes::from_static(b"seven"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.loads(), 1);
        assert_eq!(store.coalesced(), 15);
        assert_eq!(store.in_flight(), 0);
        assert!(store.get("7").is_some());
    }

    #[tokio::test]
    async fn test_failed_fill_shared_and_not_cached() {
        let store = Arc::new(CacheStore::new(1024));
        let (release, gate) = tokio::sync::watch::channel(false);

        let first = {
            let store = store.clone();
            let mut gate = gate.clone();
            tokio::spawn(async move {
                store
                    .fill("k", move || async move {
                        let _ = gate.wait_for(|open| *open).await;
                        Err::<Filled, _>(FillError::new("backend down"))
                    })
                    .await
            })
        };
        while store.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let second = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .fill("k", || async { Ok::<_, FillError>(Filled::new("unused", None)) })
                    .await
            })
        };
        while store.coalesced() == 0 {
            tokio::task::yield_now().await;
        }
        release.send_replace(true);

        for handle in [first, second] {
            match handle.await.unwrap() {
                Err(Error::Fill(e)) => assert_eq!(e, FillError::new("backend down")),
                other => panic!("expected fill error, got {:?}", other),
            }
        }
        assert!(store.get("k").is_none());
        assert_eq!(store.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_fill_releases_key() {
        let store = Arc::new(CacheStore::new(1024));

        let first = store.fill("k", exploding_compute).await;
        assert!(matches!(first, Err(Error::Fill(_))), "{:?}", first);
        assert_eq!(store.in_flight(), 0);
        assert!(store.get("k").is_none());

        let second = store
            .fill("k", || async { Ok::<_, FillError>(Filled::new("good", None)) })
            .await;
        assert_eq!(second.unwrap(), Bytes::from_static(b"good"));
        assert_eq!(store.loads(), 2);
        assert_eq!(store.coalesced(), 0);
        assert_eq!(store.get("k").unwrap(), Bytes::from_static(b"good"));
    }

    async fn exploding_compute() -> std::result::Result<Filled, FillError> {
        panic!("getter blew up")
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_cancel_fill() {
        let store = Arc::new(CacheStore::new(1024));
        let (release, gate) = tokio::sync::watch::channel(false);

        let waiter = {
            let store = store.clone();
            let mut gate = gate.clone();
            tokio::spawn(async move {
                store
                    .fill("k", move || async move {
                        let _ = gate.wait_for(|open| *open).await;
                        Ok::<_, FillError>(Filled::new("v", None))
                    })
                    .await
            })
        };
        while store.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        waiter.abort();
        let _ = waiter.await;
        release.send_replace(true);

        while store.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.get("k").unwrap(), Bytes::from_static(b"v"));
    }
}
