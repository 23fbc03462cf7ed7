use std::sync::Arc;

use log::warn;

use super::{
    ClockSync, HeartbeatMonitor, LoadGauge, NodeDirectory, NodeId, NodeRole, NodeRuntimeState,
    NodeStatus, RoleReader,
};
use crate::common::Clock;
use crate::store::{ServerRecord, ServerStore};

/// Roles as shown in the status table: a round still in flight is reported
/// as `Follower` until it settles.
fn reported_role(role: NodeRole) -> NodeRole {
    match role {
        NodeRole::Candidate => NodeRole::Follower,
        settled => settled,
    }
}

/// Builds the cluster status table.
///
/// Peers are reported from the shared `servers` rows; this node's own row is
/// overlaid with its live role, gauge and clock offset. Rows are read
/// without any coordination, so a snapshot may mix instants.
pub struct StatusReporter {
    self_id: NodeId,
    directory: Arc<NodeDirectory>,
    servers: Arc<dyn ServerStore>,
    clock: Arc<dyn Clock>,
    roles: RoleReader,
    clock_sync: Arc<ClockSync>,
    heartbeat: Arc<HeartbeatMonitor>,
    gauge: Arc<LoadGauge>,
    stale_after_ms: i64,
}

impl StatusReporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: NodeId,
        directory: Arc<NodeDirectory>,
        servers: Arc<dyn ServerStore>,
        clock: Arc<dyn Clock>,
        roles: RoleReader,
        clock_sync: Arc<ClockSync>,
        heartbeat: Arc<HeartbeatMonitor>,
        gauge: Arc<LoadGauge>,
        stale_after_ms: i64,
    ) -> Self {
        Self {
            self_id,
            directory,
            servers,
            clock,
            roles,
            clock_sync,
            heartbeat,
            gauge,
            stale_after_ms,
        }
    }

    pub async fn snapshot(&self) -> Vec<NodeRuntimeState> {
        let rows = match self.servers.servers().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Status snapshot without store rows: {}", e);
                vec![]
            }
        };
        let now = self.clock.now_ms();
        let own_role = reported_role(self.roles.role().await);

        let mut states = Vec::with_capacity(self.directory.len());
        for node in self.directory.all_peers() {
            let row = rows
                .iter()
                .find(|r| r.id == node.id)
                .cloned()
                .unwrap_or_else(|| ServerRecord::new(node.id));

            let state = if node.id == self.self_id {
                NodeRuntimeState {
                    id: node.id,
                    name: node.display_name.clone(),
                    address: node.address.clone(),
                    role: own_role,
                    last_heartbeat_at: self.heartbeat.last_heartbeat_at().or(row.last_heartbeat),
                    clock_offset_ms: self.clock_sync.offset_ms(),
                    active_connections: self.gauge.active(),
                    status: NodeStatus::Active,
                }
            } else {
                NodeRuntimeState {
                    id: node.id,
                    name: node.display_name.clone(),
                    address: node.address.clone(),
                    role: if row.is_leader {
                        NodeRole::Leader
                    } else {
                        NodeRole::Follower
                    },
                    last_heartbeat_at: row.last_heartbeat,
                    clock_offset_ms: row.clock_offset_ms,
                    active_connections: row.connections,
                    status: self.peer_status(&row, now),
                }
            };
            states.push(state);
        }
        states
    }

    fn peer_status(&self, row: &ServerRecord, now: i64) -> NodeStatus {
        match (row.status, row.last_heartbeat) {
            (NodeStatus::Active, Some(at)) if now - at <= self.stale_after_ms => NodeStatus::Active,
            _ => NodeStatus::Inactive,
        }
    }
}
