use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Booking, BookingStore, ServerRecord, ServerStore, StoreError};
use crate::cluster::{NodeId, NodeStatus};

#[derive(Default)]
struct Tables {
    servers: BTreeMap<NodeId, ServerRecord>,
    bookings: Vec<Booking>,
    unavailable_slots: HashSet<(u64, String)>,
    offline: bool,
}

impl Tables {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    fn server_mut(&mut self, id: NodeId) -> Result<&mut ServerRecord, StoreError> {
        self.check_online()?;
        self.servers
            .get_mut(&id)
            .ok_or(StoreError::UnknownServer(id))
    }
}

/// In-process implementation of both store contracts.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Seeds one `servers` row per id.
    pub fn new<I: IntoIterator<Item = NodeId>>(server_ids: I) -> Self {
        let servers = server_ids
            .into_iter()
            .map(|id| (id, ServerRecord::new(id)))
            .collect();
        Self {
            tables: Mutex::new(Tables {
                servers,
                ..Tables::default()
            }),
        }
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub async fn set_offline(&self, offline: bool) {
        self.tables.lock().await.offline = offline;
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn record_heartbeat(&self, id: NodeId, at_ms: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let row = tables.server_mut(id)?;
        row.last_heartbeat = Some(at_ms);
        row.status = NodeStatus::Active;
        Ok(())
    }

    async fn record_connections(&self, id: NodeId, connections: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.server_mut(id)?.connections = connections;
        Ok(())
    }

    async fn record_clock_offset(&self, id: NodeId, offset_ms: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.server_mut(id)?.clock_offset_ms = offset_ms;
        Ok(())
    }

    async fn set_leader(&self, id: NodeId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_online()?;
        if !tables.servers.contains_key(&id) {
            return Err(StoreError::UnknownServer(id));
        }
        for row in tables.servers.values_mut() {
            row.is_leader = row.id == id;
        }
        Ok(())
    }

    async fn leader(&self) -> Result<Option<NodeId>, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_online()?;
        Ok(tables
            .servers
            .values()
            .find(|row| row.is_leader)
            .map(|row| row.id))
    }

    async fn servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_online()?;
        Ok(tables.servers.values().cloned().collect())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_online()?;
        tables.bookings.push(booking);
        Ok(())
    }

    async fn mark_slot_unavailable(
        &self,
        doctor_id: u64,
        slot_time: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_online()?;
        tables
            .unavailable_slots
            .insert((doctor_id, slot_time.to_string()));
        Ok(())
    }

    async fn is_slot_available(&self, doctor_id: u64, slot_time: &str) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_online()?;
        Ok(!tables
            .unavailable_slots
            .contains(&(doctor_id, slot_time.to_string())))
    }

    async fn bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let tables = self.tables.lock().await;
        tables.check_online()?;
        Ok(tables.bookings.clone())
    }
}
