use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    Ack, ClockSyncRequest, ClockSyncResponse, ElectionRequest, HealthResponse, LeaderUpdate,
    NetworkError, PeerTransport,
};
use crate::cluster::{ClusterNode, Node, NodeId, ReplicationEvent};

/// In-process transport: calls go straight to the target node's handlers.
///
/// Nodes are held weakly so a node owning this transport does not keep
/// itself alive. Any node can be cut off with [`set_reachable`], which makes
/// every call to it fail the way a refused connection would.
///
/// [`set_reachable`]: LocalTransport::set_reachable
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<NodeId, Weak<ClusterNode>>>,
    unreachable: RwLock<HashSet<NodeId>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, node: &Arc<ClusterNode>) {
        self.nodes
            .write()
            .await
            .insert(node.id(), Arc::downgrade(node));
    }

    pub async fn set_reachable(&self, id: NodeId, reachable: bool) {
        let mut unreachable = self.unreachable.write().await;
        if reachable {
            unreachable.remove(&id);
        } else {
            unreachable.insert(id);
        }
    }

    async fn target(&self, peer: &Node) -> Result<Arc<ClusterNode>, NetworkError> {
        if self.unreachable.read().await.contains(&peer.id) {
            return Err(NetworkError::ConnectionError(format!(
                "node {} at {} is unreachable",
                peer.id, peer.address
            )));
        }
        self.nodes
            .read()
            .await
            .get(&peer.id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                NetworkError::ConnectionError(format!("no node registered as {}", peer.id))
            })
    }
}

#[async_trait]
impl PeerTransport for LocalTransport {
    async fn election(&self, peer: &Node, request: ElectionRequest) -> Result<Ack, NetworkError> {
        Ok(self.target(peer).await?.handle_election(request).await)
    }

    async fn leader_update(&self, peer: &Node, update: LeaderUpdate) -> Result<Ack, NetworkError> {
        Ok(self.target(peer).await?.handle_leader_update(update).await)
    }

    async fn clock_sync(
        &self,
        peer: &Node,
        request: ClockSyncRequest,
    ) -> Result<ClockSyncResponse, NetworkError> {
        Ok(self.target(peer).await?.handle_clock_sync(request))
    }

    async fn replicate(&self, peer: &Node, event: &ReplicationEvent) -> Result<Ack, NetworkError> {
        Ok(self
            .target(peer)
            .await?
            .handle_replicated(event.clone())
            .await)
    }

    async fn health(&self, peer: &Node) -> Result<HealthResponse, NetworkError> {
        Ok(self.target(peer).await?.health())
    }
}
