use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{ClusterError, LoadGauge, NodeDirectory, NodeId, RoleReader};
use crate::common::Clock;
use crate::network::{metrics, with_timeout, PeerTransport};
use crate::store::ServerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHealth {
    pub id: NodeId,
    pub reachable: bool,
}

/// Publishes this node's heartbeat and, while leader, probes the peers.
///
/// Probe failures are only logged; nothing here triggers a re-election.
pub struct HeartbeatMonitor {
    self_id: NodeId,
    directory: Arc<NodeDirectory>,
    transport: Arc<dyn PeerTransport>,
    servers: Arc<dyn ServerStore>,
    clock: Arc<dyn Clock>,
    roles: RoleReader,
    gauge: Arc<LoadGauge>,
    health_timeout: Duration,
    // 0 until the first successful publish
    last_published: AtomicI64,
}

impl HeartbeatMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: NodeId,
        directory: Arc<NodeDirectory>,
        transport: Arc<dyn PeerTransport>,
        servers: Arc<dyn ServerStore>,
        clock: Arc<dyn Clock>,
        roles: RoleReader,
        gauge: Arc<LoadGauge>,
        health_timeout: Duration,
    ) -> Self {
        Self {
            self_id,
            directory,
            transport,
            servers,
            clock,
            roles,
            gauge,
            health_timeout,
            last_published: AtomicI64::new(0),
        }
    }

    pub fn last_heartbeat_at(&self) -> Option<i64> {
        match self.last_published.load(Ordering::SeqCst) {
            0 => None,
            at => Some(at),
        }
    }

    /// Write this node's heartbeat (and current connection count) to the store.
    pub async fn publish_once(&self) -> Result<i64, ClusterError> {
        let now = self.clock.now_ms();
        self.servers.record_heartbeat(self.self_id, now).await?;
        self.servers
            .record_connections(self.self_id, self.gauge.active())
            .await?;
        self.last_published.store(now, Ordering::SeqCst);
        debug!("Node {} heartbeat at {}", self.self_id, now);
        Ok(now)
    }

    /// Probe every peer's health endpoint. Returns nothing unless this node
    /// is currently leader.
    ///
    /// A peer that answers gets a heartbeat stamped with this node's clock,
    /// so the leader's status table stays current even when every node keeps
    /// its own server store. Followers only learn peer liveness from a shared
    /// store or from the leader's `/servers`.
    pub async fn probe_peers_once(&self) -> Vec<PeerHealth> {
        if !self.roles.is_leader().await {
            return vec![];
        }

        let mut results = Vec::new();
        for peer in self.directory.peers_excluding(self.self_id) {
            let reachable =
                match with_timeout(self.health_timeout, self.transport.health(&peer)).await {
                    Ok(_) => {
                        let seen_at = self.clock.now_ms();
                        if let Err(e) = self.servers.record_heartbeat(peer.id, seen_at).await {
                            warn!("Could not record heartbeat for node {}: {}", peer.id, e);
                        }
                        true
                    }
                    Err(e) => {
                        metrics::record_probe_failure();
                        warn!("Node {} appears down: {}", peer.id, e);
                        false
                    }
                };
            results.push(PeerHealth {
                id: peer.id,
                reachable,
            });
        }
        results
    }

    /// Spawn the publish loop and the probe loop.
    pub fn spawn(
        self: &Arc<Self>,
        heartbeat_interval: Duration,
        probe_interval: Duration,
    ) -> Vec<JoinHandle<()>> {
        let publisher = Arc::clone(self);
        let publish = tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = publisher.publish_once().await {
                    error!("Heartbeat publish failed: {}", e);
                }
            }
        });

        let prober = Arc::clone(self);
        let probe = tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                prober.probe_peers_once().await;
            }
        });

        vec![publish, probe]
    }
}
