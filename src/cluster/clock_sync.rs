//! Cristian's algorithm.
//!
//! The initiator records its local send time, the responder answers with its
//! own (offset-corrected) time, and the initiator estimates the responder's
//! clock as `server_time + rtt / 2`. The resulting offset is a single point
//! estimate: no smoothing, no outlier rejection.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::{ClusterError, Node, NodeDirectory, NodeId};
use crate::common::Clock;
use crate::network::{metrics, with_timeout, ClockSyncRequest, ClockSyncResponse, PeerTransport};

/// One completed request/response, seen from the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSyncExchange {
    pub client_send_time: i64,
    pub server_time: i64,
    pub round_trip_time: i64,
    pub adjusted_time: i64,
}

impl ClockSyncExchange {
    pub fn complete(client_send_time: i64, server_time: i64, received_at: i64) -> Self {
        let round_trip_time = received_at.saturating_sub(client_send_time).max(0);
        Self {
            client_send_time,
            server_time,
            round_trip_time,
            adjusted_time: server_time.saturating_add(round_trip_time / 2),
        }
    }
}

pub struct ClockSync {
    self_id: NodeId,
    clock: Arc<dyn Clock>,
    offset_ms: AtomicI64,
}

impl ClockSync {
    pub fn new(self_id: NodeId, clock: Arc<dyn Clock>) -> Self {
        Self {
            self_id,
            clock,
            offset_ms: AtomicI64::new(0),
        }
    }

    pub fn local_time(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Estimate of `true_time - local_time`.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::SeqCst)
    }

    pub fn adjusted_now(&self) -> i64 {
        self.local_time().saturating_add(self.offset_ms())
    }

    /// Responder side. `server_time` is captured here; `rtt` and
    /// `adjusted_time` are only this node's view (time since the client's
    /// send stamp), the initiator recomputes both on receipt. `client_time`
    /// comes off the wire, so every step saturates.
    pub fn respond(&self, client_time: i64) -> ClockSyncResponse {
        let server_time = self.adjusted_now();
        let rtt = server_time.saturating_sub(client_time).max(0);
        ClockSyncResponse {
            adjusted_time: server_time.saturating_add(rtt / 2),
            rtt,
            server_time,
            clock_offset: self.offset_ms(),
        }
    }

    /// Adopt `exchange` as the new offset estimate and return it.
    pub fn apply(&self, exchange: &ClockSyncExchange) -> i64 {
        let offset = exchange.adjusted_time.saturating_sub(self.local_time());
        self.offset_ms.store(offset, Ordering::SeqCst);
        offset
    }

    /// Run one exchange against `peer` and adopt the result.
    pub async fn perform_sync(
        &self,
        transport: &dyn PeerTransport,
        peer: &Node,
        timeout: Duration,
    ) -> Result<ClockSyncExchange, ClusterError> {
        let client_send_time = self.local_time();
        let response = with_timeout(
            timeout,
            transport.clock_sync(peer, ClockSyncRequest { client_time: client_send_time }),
        )
        .await
        .map_err(|e| ClusterError::unreachable(peer.id, &e))?;

        let exchange =
            ClockSyncExchange::complete(client_send_time, response.server_time, self.local_time());
        let offset = self.apply(&exchange);
        metrics::record_clock_sync();
        debug!(
            "Node {} synced with node {}: rtt={}ms offset={}ms",
            self.self_id, peer.id, exchange.round_trip_time, offset
        );
        Ok(exchange)
    }

    /// Try each candidate in order until one answers. On total failure the
    /// previous offset is kept.
    pub async fn sync_with_reference(
        &self,
        transport: &dyn PeerTransport,
        candidates: &[Node],
        timeout: Duration,
    ) -> Result<(NodeId, ClockSyncExchange), ClusterError> {
        for peer in candidates {
            match self.perform_sync(transport, peer, timeout).await {
                Ok(exchange) => {
                    info!(
                        "Node {} clock offset now {}ms (reference node {})",
                        self.self_id,
                        self.offset_ms(),
                        peer.id
                    );
                    return Ok((peer.id, exchange));
                }
                Err(e) => warn!("Clock sync: {}", e),
            }
        }
        Err(ClusterError::SyncUnavailable)
    }
}

/// Order in which to try sync references: the known leader first (when it
/// is someone else), then the other members by ascending id.
pub fn reference_order(
    directory: &NodeDirectory,
    self_id: NodeId,
    leader_id: Option<NodeId>,
) -> Vec<Node> {
    let mut peers = directory.peers_excluding(self_id);
    if let Some(leader) = leader_id {
        if let Some(pos) = peers.iter().position(|n| n.id == leader) {
            let leader = peers.remove(pos);
            peers.insert(0, leader);
        }
    }
    peers
}
