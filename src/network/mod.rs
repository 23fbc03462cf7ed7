mod error;

pub mod client;
pub mod http_api;
pub mod local;
pub mod message;
pub mod metrics;

pub use self::client::HttpTransport;
pub use self::error::NetworkError;
pub use self::local::LocalTransport;
pub use self::message::*;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::{Node, ReplicationEvent};

/// Outbound calls from one node to another, one method per RPC.
///
/// Implementations do not enforce timeouts themselves; callers wrap every
/// call in [`with_timeout`].
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn election(&self, peer: &Node, request: ElectionRequest) -> Result<Ack, NetworkError>;

    async fn leader_update(&self, peer: &Node, update: LeaderUpdate) -> Result<Ack, NetworkError>;

    async fn clock_sync(
        &self,
        peer: &Node,
        request: ClockSyncRequest,
    ) -> Result<ClockSyncResponse, NetworkError>;

    async fn replicate(&self, peer: &Node, event: &ReplicationEvent) -> Result<Ack, NetworkError>;

    async fn health(&self, peer: &Node) -> Result<HealthResponse, NetworkError>;
}

pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, NetworkError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::TimeoutError),
    }
}
