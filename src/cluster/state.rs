use serde::{Deserialize, Serialize};

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    /// Only while this node's own election round is in flight.
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Inactive,
}

/// What a node currently believes about leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderView {
    pub role: NodeRole,
    pub leader_id: Option<NodeId>,
}

impl Default for LeaderView {
    fn default() -> Self {
        Self {
            role: NodeRole::Follower,
            leader_id: None,
        }
    }
}

/// One node's row in a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRuntimeState {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    pub role: NodeRole,
    pub last_heartbeat_at: Option<i64>,
    pub clock_offset_ms: i64,
    pub active_connections: i64,
    pub status: NodeStatus,
}
