#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use docket::common::ManualClock;
use docket::config::{Config, PeerConfig, TimingConfig};
use docket::{ClusterNode, LocalTransport, MemoryStore, NodeId};

pub const START_MS: i64 = 1_700_000_000_000;

/// Short timeouts so scenarios settle in milliseconds.
pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        election_timeout: 200,
        leader_update_timeout: 200,
        replication_timeout: 200,
        clock_sync_timeout: 200,
        health_timeout: 200,
        contest_delay: 20,
        startup_election_delay: 20,
        ..TimingConfig::default()
    }
}

pub fn address(id: NodeId) -> String {
    format!("127.0.0.1:{}", 4000 + id)
}

pub fn config_for(id: NodeId, ids: &[NodeId], addresses: &dyn Fn(NodeId) -> String) -> Config {
    Config {
        node_id: id,
        name: None,
        address: addresses(id),
        peers: ids
            .iter()
            .filter(|&&peer| peer != id)
            .map(|&peer| PeerConfig {
                id: peer,
                address: addresses(peer),
                name: None,
            })
            .collect(),
        timing: fast_timing(),
    }
}

pub struct TestCluster {
    pub transport: Arc<LocalTransport>,
    pub servers: Arc<MemoryStore>,
    pub nodes: Vec<Arc<ClusterNode>>,
    pub bookings: Vec<Arc<MemoryStore>>,
    pub clocks: Vec<Arc<ManualClock>>,
}

impl TestCluster {
    /// Nodes `1..=n` sharing one clock and one `servers` table; each node
    /// has its own booking store.
    pub async fn new(n: u64) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        Self::with_clocks((1..=n).map(|_| Arc::clone(&clock)).collect()).await
    }

    /// One node per clock, ids starting at 1.
    pub async fn with_clocks(clocks: Vec<Arc<ManualClock>>) -> Self {
        let ids: Vec<NodeId> = (1..=clocks.len() as NodeId).collect();
        let transport = Arc::new(LocalTransport::new());
        let servers = Arc::new(MemoryStore::new(ids.clone()));

        let mut nodes = Vec::new();
        let mut bookings = Vec::new();
        for (&id, clock) in ids.iter().zip(&clocks) {
            let store = Arc::new(MemoryStore::new(ids.clone()));
            let node = Arc::new(ClusterNode::new(
                &config_for(id, &ids, &address),
                transport.clone(),
                servers.clone(),
                store.clone(),
                clock.clone(),
            ));
            transport.register(&node).await;
            nodes.push(node);
            bookings.push(store);
        }

        Self {
            transport,
            servers,
            nodes,
            bookings,
            clocks,
        }
    }

    pub fn node(&self, id: NodeId) -> &Arc<ClusterNode> {
        &self.nodes[(id - 1) as usize]
    }

    pub fn bookings_of(&self, id: NodeId) -> &Arc<MemoryStore> {
        &self.bookings[(id - 1) as usize]
    }

    pub async fn cut_off(&self, id: NodeId) {
        self.transport.set_reachable(id, false).await;
    }
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
