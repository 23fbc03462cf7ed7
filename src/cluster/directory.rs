use serde::{Deserialize, Serialize};

pub type NodeId = u64;

/// A cluster member. Fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// host:port of the node's HTTP endpoint.
    pub address: String,
    pub display_name: String,
}

impl Node {
    pub fn new(id: NodeId, address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id,
            address: address.into(),
            display_name: name.unwrap_or_else(|| format!("Server {id}")),
        }
    }

    /// Port component of `address`, if it has one.
    pub fn port(&self) -> Option<u16> {
        self.address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }
}

/// Static membership list, kept sorted by id.
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    nodes: Vec<Node>,
}

impl NodeDirectory {
    pub fn new(mut nodes: Vec<Node>) -> Self {
        nodes.sort_by_key(|n| n.id);
        nodes.dedup_by_key(|n| n.id);
        Self { nodes }
    }

    pub fn all_peers(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn peers_excluding(&self, self_id: NodeId) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|n| n.id != self_id)
            .cloned()
            .collect()
    }

    /// Members that outrank `self_id`, lowest first.
    pub fn higher_id_peers(&self, self_id: NodeId) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|n| n.id > self_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
