//! JSON bodies of the inter-node and status endpoints.

use serde::{Deserialize, Serialize};

use crate::cluster::{NodeId, NodeRole, NodeRuntimeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionRequest {
    pub candidate_id: NodeId,
    pub timestamp: i64,
}

/// Generic reply. For `/election`, `success == false` means
/// "I am alive and will contend".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn with_message(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderUpdate {
    pub new_leader_id: NodeId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSyncRequest {
    pub client_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSyncResponse {
    pub adjusted_time: i64,
    pub rtt: i64,
    pub server_time: i64,
    pub clock_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub server_id: NodeId,
    pub port: u16,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersResponse {
    pub data: Vec<NodeRuntimeState>,
    pub server: NodeId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderResponse {
    pub leader_id: Option<NodeId>,
    pub self_id: NodeId,
    pub role: NodeRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockResponse {
    pub local_time: i64,
    pub offset_ms: i64,
    pub adjusted_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub doctor_id: u64,
    pub patient_name: String,
    pub slot_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateLoadRequest {
    pub tasks: usize,
    #[serde(default = "default_work_ms")]
    pub work_ms: u64,
}

fn default_work_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateLoadResponse {
    pub completed: usize,
    pub peak_connections: i64,
}
