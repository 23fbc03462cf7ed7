//! Best-effort fan-out of local writes to every other node.
//!
//! Events carry no id or sequence number. A peer that misses a call never
//! receives that event, and a peer that receives one twice applies it twice.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{ClusterError, NodeDirectory, NodeId};
use crate::network::{metrics, with_timeout, PeerTransport};
use crate::store::{Booking, BookingStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotUnavailable {
    pub doctor_id: u64,
    pub slot_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ReplicationEvent {
    BookingCreated(Booking),
    SlotMarkedUnavailable(SlotUnavailable),
}

impl ReplicationEvent {
    pub fn label(&self) -> &'static str {
        match self {
            ReplicationEvent::BookingCreated(_) => "booking",
            ReplicationEvent::SlotMarkedUnavailable(_) => "slot",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationReport {
    pub delivered: Vec<NodeId>,
    pub failed: Vec<(NodeId, String)>,
}

impl ReplicationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn partial_failure(&self) -> Option<ClusterError> {
        if self.failed.is_empty() {
            return None;
        }
        Some(ClusterError::ReplicationPartialFailure {
            failed: self.failed.iter().map(|(id, _)| *id).collect(),
        })
    }
}

pub struct ReplicationDispatcher {
    self_id: NodeId,
    directory: Arc<NodeDirectory>,
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    concurrency: usize,
}

impl ReplicationDispatcher {
    pub fn new(
        self_id: NodeId,
        directory: Arc<NodeDirectory>,
        transport: Arc<dyn PeerTransport>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            self_id,
            directory,
            transport,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Send `event` to every peer. Never fails: each peer's outcome is
    /// logged and reported, and the local write it describes stands
    /// regardless.
    pub async fn replicate(&self, event: ReplicationEvent) -> ReplicationReport {
        let event = Arc::new(event);
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for peer in self.directory.peers_excluding(self.self_id) {
            let event = Arc::clone(&event);
            let permits = Arc::clone(&permits);
            let transport = Arc::clone(&self.transport);
            let timeout = self.timeout;
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let res = with_timeout(timeout, transport.replicate(&peer, &event)).await;
                let outcome = match res {
                    Ok(ack) if ack.success => Ok(()),
                    Ok(ack) => Err(ack
                        .message
                        .unwrap_or_else(|| "rejected by peer".to_string())),
                    Err(e) => Err(e.to_string()),
                };
                (peer.id, outcome)
            });
        }

        let mut report = ReplicationReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    metrics::record_replication(true);
                    report.delivered.push(peer);
                }
                Ok((peer, Err(reason))) => {
                    metrics::record_replication(false);
                    warn!(
                        "Replication of {} event to node {} failed: {}",
                        event.label(),
                        peer,
                        reason
                    );
                    report.failed.push((peer, reason));
                }
                Err(e) => error!("Replication task failed: {}", e),
            }
        }
        report.delivered.sort_unstable();
        report.failed.sort_by_key(|(id, _)| *id);

        if let Some(err) = report.partial_failure() {
            warn!("{}", err);
        } else {
            debug!(
                "Replicated {} event to {} peers",
                event.label(),
                report.delivered.len()
            );
        }
        report
    }
}

/// Receiving side: perform the same local mutation the origin performed.
/// No ordering or duplicate check.
pub async fn apply_replicated_event(
    store: &dyn BookingStore,
    event: &ReplicationEvent,
) -> Result<(), StoreError> {
    match event {
        ReplicationEvent::BookingCreated(booking) => store.insert_booking(booking.clone()).await,
        ReplicationEvent::SlotMarkedUnavailable(slot) => {
            store
                .mark_slot_unavailable(slot.doctor_id, &slot.slot_time)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn booking() -> Booking {
        Booking {
            doctor_id: 4,
            patient_name: "Grace".to_string(),
            slot_time: "2024-05-01T10:30".to_string(),
            confirmation_id: "CONF-0001".to_string(),
            booking_timestamp: 1_714_559_400_000,
            origin_server_id: 2,
        }
    }

    #[test]
    fn booking_event_wire_shape() {
        let value = serde_json::to_value(ReplicationEvent::BookingCreated(booking())).unwrap();
        assert_eq!(value["kind"], json!("BookingCreated"));
        assert_eq!(value["doctorId"], json!(4));
        assert_eq!(value["serverId"], json!(2));
        assert_eq!(value["confirmationId"], json!("CONF-0001"));
    }

    #[test]
    fn partial_failure_lists_failed_peers() {
        let report = ReplicationReport {
            delivered: vec![2],
            failed: vec![(3, "timeout".to_string())],
        };
        assert!(!report.is_complete());
        match report.partial_failure() {
            Some(ClusterError::ReplicationPartialFailure { failed }) => assert_eq!(failed, vec![3]),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ReplicationReport::default().partial_failure().is_none());
    }

    #[tokio::test]
    async fn duplicate_booking_delivery_produces_duplicate_rows() {
        let store = MemoryStore::new([1]);
        let event = ReplicationEvent::BookingCreated(booking());

        apply_replicated_event(&store, &event).await.unwrap();
        apply_replicated_event(&store, &event).await.unwrap();

        let rows = store.bookings().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
    }

    #[tokio::test]
    async fn slot_event_marks_slot_unavailable() {
        let store = MemoryStore::new([1]);
        let event = ReplicationEvent::SlotMarkedUnavailable(SlotUnavailable {
            doctor_id: 4,
            slot_time: "2024-05-01T10:30".to_string(),
        });

        apply_replicated_event(&store, &event).await.unwrap();
        assert!(!store.is_slot_available(4, "2024-05-01T10:30").await.unwrap());
    }
}
