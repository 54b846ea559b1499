//! Membership → peer-set reconciliation
//!
//! Each tick reads the current membership snapshot and, only when it
//! differs from the last applied one, installs the derived endpoints as the
//! router's new peer set. The reconciler is the sole writer of the peer set.

use super::{PeerRouter, PeerUrlTemplate};
use crate::common::lock::mutex_lock;
use crate::common::Result;
use crate::membership::{members_changed, MembershipSnapshot, MembershipSource};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const SOURCE: &str = "router::reconcile";

pub struct Reconciler {
    source: Arc<dyn MembershipSource>,
    router: Arc<PeerRouter>,
    template: PeerUrlTemplate,
    known: Mutex<MembershipSnapshot>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn MembershipSource>,
        router: Arc<PeerRouter>,
        template: PeerUrlTemplate,
    ) -> Self {
        Self {
            source,
            router,
            template,
            known: Mutex::new(MembershipSnapshot::new()),
        }
    }

    /// Run one reconciliation step. Returns whether the peer set was replaced.
    pub fn reconcile_once(&self) -> Result<bool> {
        let current = self.source.current_members()?;
        let mut known = mutex_lock(&self.known, SOURCE, "reconcile_once");

        if !members_changed(&known, &current) {
            return Ok(false);
        }

        let added: Vec<&String> = current.iter().filter(|m| !known.contains(m)).collect();
        let removed: Vec<&String> = known.iter().filter(|m| !current.contains(m)).collect();
        tracing::info!(?added, ?removed, "Membership changed");

        let peers: Vec<_> = current
            .sorted()
            .iter()
            .map(|name| self.template.endpoint(name))
            .collect();
        let rendered: Vec<&str> = peers.iter().map(|p| p.as_str()).collect();
        tracing::info!(peers = ?rendered, "Updating peer set");

        self.router.set_peers(peers);
        *known = current;

        Ok(true)
    }

    /// Start the periodic loop. The first tick runs immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReconcileHandle {
        let (shutdown, mut rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = rx.changed() => break,
                }

                // Synchronous: shutdown can only land between updates
                match self.reconcile_once() {
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(error = %e, "Membership read failed, retrying next tick");
                    }
                    Err(e) => tracing::error!(error = %e, "Reconciliation failed"),
                }
            }

            tracing::info!("Reconciliation loop stopped");
        });

        ReconcileHandle { shutdown, task }
    }
}

/// Handle to a running reconciliation loop
pub struct ReconcileHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcileHandle {
    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Reconciliation task ended abnormally");
        }
    }
}
