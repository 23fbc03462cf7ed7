//! The coordination layer: membership, Bully election, Cristian clock sync,
//! heartbeats, best-effort replication and status reporting.

mod clock_sync;
mod directory;
mod election;
mod error;
mod heartbeat;
mod load;
mod node;
mod replication;
mod state;
mod status;

pub use self::clock_sync::{reference_order, ClockSync, ClockSyncExchange};
pub use self::directory::{Node, NodeDirectory, NodeId};
pub use self::election::{ElectionEngine, ElectionOutcome, ElectionSettings, RoleReader};
pub use self::error::ClusterError;
pub use self::heartbeat::{HeartbeatMonitor, PeerHealth};
pub use self::load::{BatchReport, ConnectionGuard, LoadGauge};
pub use self::node::ClusterNode;
pub use self::replication::{
    apply_replicated_event, ReplicationDispatcher, ReplicationEvent, ReplicationReport,
    SlotUnavailable,
};
pub use self::state::{LeaderView, NodeRole, NodeRuntimeState, NodeStatus};
pub use self::status::StatusReporter;
