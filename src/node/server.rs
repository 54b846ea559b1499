//! Cache node server
//!
//! Startup order: bind gossip, join the seed (fatal on failure), build the
//! router, reconcile once, start the reconciliation loop, serve HTTP.

use super::coordinator::Coordinator;
use super::http::{create_router, CacheState};
use super::peer_client::PeerClient;
use crate::cache::GroupRegistry;
use crate::common::{Config, Error, Result};
use crate::membership::GossipMembership;
use crate::router::{PeerRouter, PeerUrlTemplate, ReconcileHandle, Reconciler};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct Node {
    config: Config,
    groups: Arc<GroupRegistry>,
}

impl Node {
    pub fn new(config: Config, groups: Arc<GroupRegistry>) -> Self {
        Self { config, groups }
    }

    /// Bind the configured HTTP address and start
    pub async fn start(self) -> Result<NodeHandle> {
        let listener = TcpListener::bind(self.config.http_addr).await?;
        self.start_on(listener).await
    }

    /// Start on an already bound HTTP listener
    pub async fn start_on(self, listener: TcpListener) -> Result<NodeHandle> {
        let config = self.config;
        config.validate()?;

        let name = config.node_name.clone();
        let http_addr = listener.local_addr()?;

        tracing::info!("Starting cache node: {}", name);
        tracing::info!("  HTTP API: {}", http_addr);
        tracing::info!("  Gossip: {}", config.gossip_addr);
        tracing::info!("  Seed: {}", config.seed.as_deref().unwrap_or("(none, seed node)"));
        tracing::info!("  Peer template: {}", config.peer_url_template);

        let gossip =
            GossipMembership::bind(name.clone(), config.gossip_addr, config.gossip.clone()).await?;
        gossip.start();

        if let Some(seed) = &config.seed {
            tracing::info!(%seed, "Joining cluster");
            if let Err(e) = gossip.join(seed).await {
                tracing::error!(%seed, error = %e, "Failed to join cluster");
                gossip.shutdown().await;
                return Err(e);
            }
        }

        let template = PeerUrlTemplate::new(&config.peer_url_template)?;
        let router = Arc::new(PeerRouter::new(
            template.endpoint(&name),
            config.virtual_nodes,
        ));

        let reconciler = Arc::new(Reconciler::new(gossip.clone(), router.clone(), template));
        if let Err(e) = reconciler.reconcile_once() {
            tracing::warn!(error = %e, "Initial reconciliation failed");
        }
        let reconcile = reconciler.clone().spawn(config.poll_interval());

        let coordinator = Arc::new(Coordinator::new(
            router.clone(),
            self.groups.clone(),
            PeerClient::new(config.base_path.clone()),
            config.request_timeout(),
        ));

        let app = create_router(
            CacheState {
                node_name: name.clone(),
                coordinator: coordinator.clone(),
            },
            &config.base_path,
        );

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
                .map_err(Error::from)
        });

        tracing::info!(node = %name, peers = router.peer_count(), "Cache node ready");

        Ok(NodeHandle {
            name,
            http_addr,
            gossip,
            router,
            coordinator,
            reconciler,
            reconcile,
            stop_tx,
            server,
        })
    }
}

/// A running node
pub struct NodeHandle {
    name: String,
    http_addr: SocketAddr,
    gossip: Arc<GossipMembership>,
    router: Arc<PeerRouter>,
    coordinator: Arc<Coordinator>,
    reconciler: Arc<Reconciler>,
    reconcile: ReconcileHandle,
    stop_tx: oneshot::Sender<()>,
    server: JoinHandle<Result<()>>,
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.gossip.local_addr()
    }

    pub fn gossip(&self) -> &Arc<GossipMembership> {
        &self.gossip
    }

    pub fn router(&self) -> &Arc<PeerRouter> {
        &self.router
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Run one reconciliation pass now instead of waiting for the next tick
    pub fn reconcile_now(&self) -> Result<bool> {
        self.reconciler.reconcile_once()
    }

    /// Serve until `signal` resolves or the HTTP server fails, then shut down
    pub async fn run_until<F>(mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            _ = signal => None,
            res = &mut self.server => Some(res),
        };

        match outcome {
            None => self.shutdown().await,
            Some(res) => {
                self.reconcile.shutdown().await;
                self.gossip.shutdown().await;
                let res = res.map_err(|e| Error::Internal(format!("HTTP server task: {}", e)))?;
                if let Err(e) = &res {
                    tracing::error!("HTTP server error: {}", e);
                }
                res
            }
        }
    }

    /// Stop serving, stop the reconciliation loop, leave gossip
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!(node = %self.name, "Shutting down cache node");

        let _ = self.stop_tx.send(());
        let served = match self.server.await {
            Ok(res) => res,
            Err(e) => Err(Error::Internal(format!("HTTP server task: {}", e))),
        };

        self.reconcile.shutdown().await;
        self.gossip.shutdown().await;

        tracing::info!(node = %self.name, "Cache node stopped");
        served
    }
}
