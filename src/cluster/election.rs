//! Bully leader election.
//!
//! A node contacts every higher-id member in ascending order. The first one
//! that answers "alive" takes over the election and this node stays a
//! follower; if none answers, this node declares itself leader and tells
//! everyone. A node that hears from a lower candidate answers "alive" and,
//! after `contest_delay`, runs its own round, so elections cascade upward
//! until the highest reachable id wins.
//!
//! There is no term or epoch number. Two rounds that resolve concurrently can
//! leave two nodes believing they lead until a later round or leader update
//! reaches them.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{ClusterError, LeaderView, NodeDirectory, NodeId, NodeRole};
use crate::common::Clock;
use crate::config::TimingConfig;
use crate::network::{metrics, with_timeout, Ack, ElectionRequest, LeaderUpdate, PeerTransport};
use crate::store::ServerStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum ElectionOutcome {
    /// No higher node answered. A non-empty `unreachable` list means the
    /// round was inconclusive and resolved by defaulting to leader.
    BecameLeader { unreachable: Vec<NodeId> },
    /// A higher node is alive and will contest.
    Deferred { to: NodeId },
}

#[derive(Debug, Clone, Copy)]
pub struct ElectionSettings {
    pub election_timeout: Duration,
    pub leader_update_timeout: Duration,
    pub contest_delay: Duration,
}

impl From<&TimingConfig> for ElectionSettings {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            election_timeout: Duration::from_millis(timing.election_timeout),
            leader_update_timeout: Duration::from_millis(timing.leader_update_timeout),
            contest_delay: Duration::from_millis(timing.contest_delay),
        }
    }
}

/// Read-only access to the election engine's leader view.
#[derive(Clone)]
pub struct RoleReader {
    view: Arc<RwLock<LeaderView>>,
}

impl RoleReader {
    pub async fn role(&self) -> NodeRole {
        self.view.read().await.role
    }

    pub async fn is_leader(&self) -> bool {
        self.role().await == NodeRole::Leader
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        self.view.read().await.leader_id
    }
}

#[derive(Clone)]
pub struct ElectionEngine {
    self_id: NodeId,
    directory: Arc<NodeDirectory>,
    transport: Arc<dyn PeerTransport>,
    servers: Arc<dyn ServerStore>,
    clock: Arc<dyn Clock>,
    view: Arc<RwLock<LeaderView>>,
    settings: ElectionSettings,
}

impl ElectionEngine {
    pub fn new(
        self_id: NodeId,
        directory: Arc<NodeDirectory>,
        transport: Arc<dyn PeerTransport>,
        servers: Arc<dyn ServerStore>,
        clock: Arc<dyn Clock>,
        settings: ElectionSettings,
    ) -> Self {
        Self {
            self_id,
            directory,
            transport,
            servers,
            clock,
            view: Arc::new(RwLock::new(LeaderView::default())),
            settings,
        }
    }

    pub fn reader(&self) -> RoleReader {
        RoleReader {
            view: Arc::clone(&self.view),
        }
    }

    pub async fn view(&self) -> LeaderView {
        *self.view.read().await
    }

    pub async fn initiate_election(&self) -> ElectionOutcome {
        metrics::record_election_started();
        let higher = self.directory.higher_id_peers(self.self_id);
        info!(
            "Node {} starting election ({} higher peers)",
            self.self_id,
            higher.len()
        );

        if higher.is_empty() {
            self.become_leader().await;
            return ElectionOutcome::BecameLeader {
                unreachable: vec![],
            };
        }

        self.view.write().await.role = NodeRole::Candidate;

        let mut unreachable = Vec::new();
        for peer in &higher {
            let request = ElectionRequest {
                candidate_id: self.self_id,
                timestamp: self.clock.now_ms(),
            };
            let reply = with_timeout(
                self.settings.election_timeout,
                self.transport.election(peer, request),
            )
            .await;

            match reply {
                Ok(Ack { success: false, .. }) => {
                    info!(
                        "Node {} is alive and outranks node {}, deferring",
                        peer.id, self.self_id
                    );
                    self.view.write().await.role = NodeRole::Follower;
                    return ElectionOutcome::Deferred { to: peer.id };
                }
                Ok(_) => {
                    debug!("Node {} acknowledged election from {}", peer.id, self.self_id);
                }
                Err(e) => {
                    warn!("{}", ClusterError::unreachable(peer.id, &e));
                    unreachable.push(peer.id);
                }
            }
        }

        if !unreachable.is_empty() {
            warn!(
                "Election inconclusive for node {}: no higher peer answered ({:?}), taking leadership",
                self.self_id, unreachable
            );
        }
        self.become_leader().await;
        ElectionOutcome::BecameLeader { unreachable }
    }

    /// Handle an election message from `candidate_id`.
    pub async fn on_election_message(&self, candidate_id: NodeId) -> Ack {
        if candidate_id >= self.self_id {
            debug!(
                "Node {} deferring to candidate {}",
                self.self_id, candidate_id
            );
            return Ack::with_message(true, "acknowledged");
        }

        info!(
            "Node {} outranks candidate {}, contesting in {:?}",
            self.self_id, candidate_id, self.settings.contest_delay
        );
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(engine.settings.contest_delay).await;
            engine.initiate_election().await;
        });

        Ack::with_message(false, format!("node {} is alive", self.self_id))
    }

    pub async fn become_leader(&self) {
        {
            let mut view = self.view.write().await;
            view.role = NodeRole::Leader;
            view.leader_id = Some(self.self_id);
        }
        metrics::record_election_won();
        info!("Node {} became leader", self.self_id);

        if let Err(e) = self.servers.set_leader(self.self_id).await {
            error!("Failed to persist leader {}: {}", self.self_id, e);
        }
        self.notify_peers_of_new_leader().await;
    }

    pub async fn on_leader_update(&self, new_leader_id: NodeId) -> Ack {
        {
            let mut view = self.view.write().await;
            view.role = if new_leader_id == self.self_id {
                NodeRole::Leader
            } else {
                NodeRole::Follower
            };
            view.leader_id = Some(new_leader_id);
        }
        info!(
            "Node {} now recognizes node {} as leader",
            self.self_id, new_leader_id
        );

        if let Err(e) = self.servers.set_leader(new_leader_id).await {
            error!("Failed to record leader {}: {}", new_leader_id, e);
        }
        Ack::ok()
    }

    async fn notify_peers_of_new_leader(&self) {
        for peer in self.directory.peers_excluding(self.self_id) {
            let update = LeaderUpdate {
                new_leader_id: self.self_id,
                timestamp: self.clock.now_ms(),
            };
            let res = with_timeout(
                self.settings.leader_update_timeout,
                self.transport.leader_update(&peer, update),
            )
            .await;
            if let Err(e) = res {
                warn!(
                    "Leader update to node {} not delivered: {}",
                    peer.id, e
                );
            }
        }
    }
}
