pub mod cluster;
pub mod common;
pub mod config;
pub mod network;
pub mod store;

pub use cluster::{ClusterNode, ElectionOutcome, NodeDirectory, NodeId, NodeRole, ReplicationEvent};
pub use config::{Config, TimingConfig};
pub use network::{HttpTransport, LocalTransport, PeerTransport};
pub use store::{BookingStore, MemoryStore, ServerStore};
