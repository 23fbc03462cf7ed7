use thiserror::Error;

use super::NodeId;
use crate::network::NetworkError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: NodeId, reason: String },

    #[error("Replication failed for peers {failed:?}")]
    ReplicationPartialFailure { failed: Vec<NodeId> },

    #[error("No reference node reachable for clock sync")]
    SyncUnavailable,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ClusterError {
    pub fn unreachable(peer: NodeId, err: &NetworkError) -> Self {
        ClusterError::PeerUnreachable {
            peer,
            reason: err.to_string(),
        }
    }
}
