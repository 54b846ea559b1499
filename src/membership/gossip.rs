//! UDP gossip membership (SWIM-like)
//!
//! Every gossip interval the node pings one random reachable member; the
//! receiver answers with its whole member table, which the pinger merges.
//! Members that stay silent past the suspect timeout become suspects and,
//! past the dead timeout, dead. A node that hears itself suspected bumps
//! its incarnation and broadcasts `Alive`.

use super::types::{GossipMessage, Member, MembershipSnapshot, NodeName, NodeState};
use super::MembershipSource;
use crate::common::lock::mutex_lock;
use crate::common::{Error, GossipConfig, Result};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

const SOURCE: &str = "membership::gossip";

const MAX_DATAGRAM: usize = 65536;

/// Join messages sent to the seed before giving up
const JOIN_ATTEMPTS: u32 = 3;

pub struct GossipMembership {
    local_name: NodeName,
    local_addr: SocketAddr,
    config: GossipConfig,
    members: Mutex<HashMap<NodeName, Member>>,
    socket: UdpSocket,
    incarnation: AtomicU64,
    join_ack: Notify,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipMembership {
    /// Bind the gossip socket. Background tasks start with [`start`](Self::start)
    /// or [`join`](Self::join).
    pub async fn bind(
        name: impl Into<NodeName>,
        addr: SocketAddr,
        config: GossipConfig,
    ) -> Result<Arc<Self>> {
        let local_name = name.into();
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        let mut members = HashMap::new();
        members.insert(
            local_name.clone(),
            Member {
                name: local_name.clone(),
                gossip_addr: local_addr,
                state: NodeState::Alive,
                incarnation: 1,
                last_seen: Some(Instant::now()),
            },
        );

        let (shutdown, _) = watch::channel(false);

        tracing::info!(node = %local_name, addr = %local_addr, "Gossip socket bound");

        Ok(Arc::new(Self {
            local_name,
            local_addr,
            config,
            members: Mutex::new(members),
            socket,
            incarnation: AtomicU64::new(1),
            join_ack: Notify::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the receive, gossip and failure-detection tasks. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "start");
        if !tasks.is_empty() || *self.shutdown.borrow() {
            return;
        }

        tasks.push(tokio::spawn(
            self.clone().receive_loop(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.clone().gossip_loop(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.clone().failure_detection_loop(self.shutdown.subscribe()),
        ));

        tracing::info!(node = %self.local_name, "Gossip tasks started");
    }

    /// Join the cluster through a seed node.
    ///
    /// `seed` is `host:port`; a bare host uses the local gossip port. Fails
    /// if the seed does not answer within the join timeout.
    pub async fn join(self: &Arc<Self>, seed: &str) -> Result<()> {
        self.start();

        let target = self.resolve_seed(seed).await?;
        let per_attempt = self.config.join_timeout() / JOIN_ATTEMPTS;
        let msg = GossipMessage::Join {
            name: self.local_name.clone(),
            incarnation: self.incarnation.load(Ordering::SeqCst),
        };
        let encoded = bincode::serialize(&msg)?;

        tracing::info!(seed, %target, "Joining cluster");

        for attempt in 1..=JOIN_ATTEMPTS {
            // Registered before sending so an immediate answer is not missed
            let acked = self.join_ack.notified();

            self.socket
                .send_to(&encoded, target)
                .await
                .map_err(|e| Error::Join {
                    seed: seed.to_string(),
                    reason: e.to_string(),
                })?;

            if tokio::time::timeout(per_attempt, acked).await.is_ok() {
                let size = self.table("join").len();
                tracing::info!(seed, cluster_size = size, "Joined cluster");
                return Ok(());
            }

            tracing::debug!(seed, attempt, "No join answer yet");
        }

        tracing::error!(seed, "Seed did not answer join request");
        Err(Error::Join {
            seed: seed.to_string(),
            reason: format!("no answer within {:?}", self.config.join_timeout()),
        })
    }

    /// Stop all background tasks and wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *mutex_lock(&self.tasks, SOURCE, "shutdown"));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Gossip task ended abnormally");
            }
        }

        tracing::info!(node = %self.local_name, "Gossip membership stopped");
    }

    /// State of a member as currently seen, for diagnostics
    pub fn member_state(&self, name: &str) -> Option<NodeState> {
        self.table("member_state").get(name).map(|m| m.state)
    }

    fn table(&self, op: &'static str) -> MutexGuard<'_, HashMap<NodeName, Member>> {
        mutex_lock(&self.members, SOURCE, op)
    }

    async fn resolve_seed(&self, seed: &str) -> Result<SocketAddr> {
        let addr = if seed.contains(':') {
            seed.to_string()
        } else {
            format!("{}:{}", seed, self.local_addr.port())
        };

        let join_err = |reason: String| Error::Join {
            seed: seed.to_string(),
            reason,
        };

        let resolved = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| join_err(e.to_string()))?
            .next();
        resolved.ok_or_else(|| join_err("seed did not resolve".into()))
    }

    async fn receive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, src) = tokio::select! {
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to receive gossip packet");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };

            match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                Ok(msg) => self.handle_message(msg, src).await,
                Err(e) => {
                    tracing::warn!(%src, error = %e, "Failed to decode gossip message");
                }
            }
        }
    }

    async fn gossip_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let target = {
                let table = self.table("gossip_loop");
                let candidates: Vec<SocketAddr> = table
                    .values()
                    .filter(|m| m.name != self.local_name && m.state.is_reachable())
                    .map(|m| m.gossip_addr)
                    .collect();
                candidates.choose(&mut rand::thread_rng()).copied()
            };

            let Some(target) = target else {
                continue;
            };

            let msg = GossipMessage::Ping {
                from: self.local_name.clone(),
                incarnation: self.incarnation.load(Ordering::SeqCst),
            };
            self.send(&msg, target).await;
        }
    }

    async fn failure_detection_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.failure_check_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            for msg in self.check_failures(Instant::now()) {
                self.broadcast(&msg).await;
            }
        }
    }

    /// Advance member states by silence as of `now`, forgetting members dead
    /// for longer than the retention period. Returns suspicions to broadcast.
    fn check_failures(&self, now: Instant) -> Vec<GossipMessage> {
        let mut suspicions = Vec::new();
        let mut forgotten = Vec::new();
        let mut table = self.table("check_failures");

        for member in table.values_mut() {
            if member.name == self.local_name {
                continue;
            }

            let last_seen = *member.last_seen.get_or_insert(now);
            let elapsed = now.saturating_duration_since(last_seen);

            match member.state {
                NodeState::Alive if elapsed > self.config.suspect_timeout() => {
                    tracing::warn!(
                        node = %member.name,
                        silent_ms = elapsed.as_millis() as u64,
                        "Member suspected"
                    );
                    member.state = NodeState::Suspect;
                    suspicions.push(GossipMessage::Suspect {
                        name: member.name.clone(),
                        incarnation: member.incarnation,
                    });
                }
                NodeState::Suspect if elapsed > self.config.dead_timeout() => {
                    tracing::warn!(
                        node = %member.name,
                        silent_ms = elapsed.as_millis() as u64,
                        "Member declared dead"
                    );
                    member.state = NodeState::Dead;
                }
                NodeState::Dead
                    if elapsed > self.config.dead_timeout() + self.config.dead_retention() =>
                {
                    forgotten.push(member.name.clone());
                }
                _ => {}
            }
        }

        for name in forgotten {
            tracing::info!(node = %name, "Forgetting dead member");
            table.remove(&name);
        }

        suspicions
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) {
        match msg {
            GossipMessage::Ping { from, incarnation } => {
                tracing::trace!(%from, "Received ping");
                self.touch(&from, incarnation, src);
                let reply = GossipMessage::Ack {
                    from: self.local_name.clone(),
                    incarnation: self.incarnation.load(Ordering::SeqCst),
                    members: self.all_members(),
                };
                self.send(&reply, src).await;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.touch(&from, incarnation, src);
                self.merge_members(&from, members);
            }

            GossipMessage::Join { name, incarnation } => {
                if name == self.local_name {
                    tracing::warn!(%src, node = %name, "Join from a node using our name, ignoring");
                    return;
                }
                tracing::info!(node = %name, addr = %src, "Node joining cluster");
                self.touch(&name, incarnation, src);
                let reply = GossipMessage::JoinAck {
                    from: self.local_name.clone(),
                    incarnation: self.incarnation.load(Ordering::SeqCst),
                    members: self.all_members(),
                };
                self.send(&reply, src).await;
            }

            GossipMessage::JoinAck {
                from,
                incarnation,
                members,
            } => {
                self.touch(&from, incarnation, src);
                self.merge_members(&from, members);
                self.join_ack.notify_waiters();
            }

            GossipMessage::Suspect { name, incarnation } => {
                self.handle_suspect(name, incarnation).await;
            }

            GossipMessage::Alive { name, incarnation } => {
                // Only the member itself broadcasts Alive, so this is direct contact
                self.touch(&name, incarnation, src);
            }
        }
    }

    /// Record direct contact with a member
    fn touch(&self, name: &str, incarnation: u64, src: SocketAddr) {
        if name == self.local_name {
            return;
        }

        let mut table = self.table("touch");
        match table.get_mut(name) {
            Some(member) => {
                if member.state != NodeState::Alive {
                    tracing::info!(node = %name, previous = %member.state, "Member alive");
                }
                member.state = NodeState::Alive;
                member.gossip_addr = src;
                member.incarnation = member.incarnation.max(incarnation);
                member.last_seen = Some(Instant::now());
            }
            None => {
                tracing::info!(node = %name, addr = %src, "Discovered new member");
                table.insert(
                    name.to_string(),
                    Member {
                        name: name.to_string(),
                        gossip_addr: src,
                        state: NodeState::Alive,
                        incarnation,
                        last_seen: Some(Instant::now()),
                    },
                );
            }
        }
    }

    /// Merge a member table received from `from`.
    ///
    /// Second-hand claims never refresh `last_seen`; only direct contact does.
    fn merge_members(&self, from: &str, members: Vec<Member>) {
        let mut table = self.table("merge_members");

        for incoming in members {
            if incoming.name == self.local_name || incoming.name == from {
                continue;
            }

            match table.get_mut(&incoming.name) {
                Some(existing) => {
                    if incoming.incarnation > existing.incarnation {
                        if existing.state != incoming.state {
                            tracing::info!(
                                node = %incoming.name,
                                from = %existing.state,
                                to = %incoming.state,
                                incarnation = incoming.incarnation,
                                "Member state updated"
                            );
                        }
                        existing.state = incoming.state;
                        existing.incarnation = incoming.incarnation;
                    }
                }
                None if incoming.state == NodeState::Dead => {}
                None => {
                    tracing::info!(
                        node = %incoming.name,
                        addr = %incoming.gossip_addr,
                        via = %from,
                        "Discovered new member"
                    );
                    let mut member = incoming;
                    member.last_seen = Some(Instant::now());
                    table.insert(member.name.clone(), member);
                }
            }
        }
    }

    async fn handle_suspect(&self, name: NodeName, incarnation: u64) {
        if name == self.local_name {
            let current = self.incarnation.load(Ordering::SeqCst);
            if incarnation < current {
                return;
            }

            let next = incarnation + 1;
            self.incarnation.store(next, Ordering::SeqCst);
            if let Some(me) = self.table("refute").get_mut(&self.local_name) {
                me.incarnation = next;
            }

            tracing::info!(incarnation = next, "Refuting suspicion");
            self.broadcast(&GossipMessage::Alive {
                name,
                incarnation: next,
            })
            .await;
            return;
        }

        let mut table = self.table("suspect");
        if let Some(existing) = table.get_mut(&name) {
            if existing.state == NodeState::Alive && incarnation >= existing.incarnation {
                tracing::info!(node = %name, incarnation, "Member suspected by peer");
                existing.state = NodeState::Suspect;
                existing.incarnation = incarnation;
            }
        }
    }

    fn all_members(&self) -> Vec<Member> {
        self.table("all_members").values().cloned().collect()
    }

    async fn send(&self, msg: &GossipMessage, target: SocketAddr) {
        match bincode::serialize(msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, target).await {
                    tracing::warn!(%target, error = %e, "Failed to send gossip message");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode gossip message"),
        }
    }

    async fn broadcast(&self, msg: &GossipMessage) {
        let targets: Vec<SocketAddr> = self
            .table("broadcast")
            .values()
            .filter(|m| m.name != self.local_name && m.state.is_reachable())
            .map(|m| m.gossip_addr)
            .collect();

        for target in targets {
            self.send(msg, target).await;
        }
    }
}

impl MembershipSource for GossipMembership {
    fn current_members(&self) -> Result<MembershipSnapshot> {
        if *self.shutdown.borrow() {
            return Err(Error::GossipRead("gossip service stopped".into()));
        }

        Ok(self
            .table("current_members")
            .values()
            .filter(|m| m.state.is_reachable())
            .map(|m| m.name.clone())
            .collect())
    }
}
