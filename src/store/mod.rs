//! Contracts for the persistent store the coordination layer sits on.
//!
//! The store itself is an external collaborator: the cluster code only reads
//! and writes through these traits. [`MemoryStore`] implements both for a
//! single process and is what the binary and the tests run against.

mod error;
mod memory;

pub use self::error::StoreError;
pub use self::memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster::{NodeId, NodeStatus};

/// One row of the `servers` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: NodeId,
    pub connections: i64,
    pub is_leader: bool,
    /// Milliseconds since the UNIX epoch; `None` until the first heartbeat.
    pub last_heartbeat: Option<i64>,
    pub clock_offset_ms: i64,
    pub status: NodeStatus,
}

impl ServerRecord {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            connections: 0,
            is_leader: false,
            last_heartbeat: None,
            clock_offset_ms: 0,
            status: NodeStatus::Inactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub doctor_id: u64,
    pub patient_name: String,
    pub slot_time: String,
    pub confirmation_id: String,
    pub booking_timestamp: i64,
    #[serde(rename = "serverId")]
    pub origin_server_id: NodeId,
}

#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn record_heartbeat(&self, id: NodeId, at_ms: i64) -> Result<(), StoreError>;

    async fn record_connections(&self, id: NodeId, connections: i64) -> Result<(), StoreError>;

    async fn record_clock_offset(&self, id: NodeId, offset_ms: i64) -> Result<(), StoreError>;

    /// Marks `id` as the leader and clears the flag on every other row.
    async fn set_leader(&self, id: NodeId) -> Result<(), StoreError>;

    async fn leader(&self) -> Result<Option<NodeId>, StoreError>;

    /// All rows, ascending by id.
    async fn servers(&self) -> Result<Vec<ServerRecord>, StoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Plain insert: the same booking stored twice yields two rows.
    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError>;

    async fn mark_slot_unavailable(&self, doctor_id: u64, slot_time: &str)
        -> Result<(), StoreError>;

    async fn is_slot_available(&self, doctor_id: u64, slot_time: &str) -> Result<bool, StoreError>;

    async fn bookings(&self) -> Result<Vec<Booking>, StoreError>;
}
