use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::{Node, NodeDirectory, NodeId};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid peer entry '{0}', expected id=host:port")]
    InvalidPeer(String),

    #[error("Invalid node id {0}: ids must be positive")]
    InvalidNodeId(NodeId),

    #[error("Peer id {0} is listed more than once (or equals this node's id)")]
    DuplicatePeer(NodeId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: NodeId,
    /// Display name; defaults to "Server <id>".
    pub name: Option<String>,
    pub address: String,
    pub peers: Vec<PeerConfig>,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Intervals and timeouts, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_interval: u64,
    pub probe_interval: u64,
    pub clock_sync_interval: u64,
    pub election_timeout: u64,
    pub leader_update_timeout: u64,
    pub replication_timeout: u64,
    pub clock_sync_timeout: u64,
    pub health_timeout: u64,
    /// Pause between answering "alive" to a lower candidate and contesting.
    pub contest_delay: u64,
    pub startup_election_delay: u64,
    /// A peer whose last heartbeat is older than this is reported inactive.
    pub stale_after: u64,
    pub replication_concurrency: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 5_000,
            probe_interval: 10_000,
            clock_sync_interval: 30_000,
            election_timeout: 2_000,
            leader_update_timeout: 1_000,
            replication_timeout: 2_000,
            clock_sync_timeout: 2_000,
            health_timeout: 2_000,
            contest_delay: 1_000,
            startup_election_delay: 1_500,
            stale_after: 15_000,
            replication_concurrency: 4,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: 1,
            name: None,
            address: "127.0.0.1:4001".to_string(),
            peers: vec![],
            timing: TimingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == 0 {
            return Err(ConfigError::InvalidNodeId(0));
        }

        let mut seen = HashSet::from([self.node_id]);
        for peer in &self.peers {
            if peer.id == 0 {
                return Err(ConfigError::InvalidNodeId(0));
            }
            if !seen.insert(peer.id) {
                return Err(ConfigError::DuplicatePeer(peer.id));
            }
        }
        Ok(())
    }

    /// The static membership list: this node plus every configured peer.
    pub fn directory(&self) -> NodeDirectory {
        let mut nodes = vec![Node::new(
            self.node_id,
            self.address.clone(),
            self.name.clone(),
        )];
        nodes.extend(
            self.peers
                .iter()
                .map(|p| Node::new(p.id, p.address.clone(), p.name.clone())),
        );
        NodeDirectory::new(nodes)
    }
}

/// Parse `2=127.0.0.1:4002,3=127.0.0.1:4003`.
pub fn parse_peers(raw: &str) -> Result<Vec<PeerConfig>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, address) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidPeer(entry.to_string()))?;
            let id: NodeId = id
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPeer(entry.to_string()))?;
            let address = address.trim();
            if address.is_empty() {
                return Err(ConfigError::InvalidPeer(entry.to_string()));
            }
            Ok(PeerConfig {
                id,
                address: address.to_string(),
                name: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_default_values_are_sensible() {
        let cfg = Config::default();
        assert_eq!(cfg.node_id, 1);
        assert_eq!(cfg.address, "127.0.0.1:4001");
        assert!(cfg.peers.is_empty());
        assert_eq!(cfg.timing.heartbeat_interval, 5_000);
        assert_eq!(cfg.timing.probe_interval, 10_000);
        assert_eq!(cfg.timing.election_timeout, 2_000);
        assert_eq!(cfg.timing.contest_delay, 1_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_peers_accepts_list_and_skips_blanks() {
        let peers = parse_peers("2=127.0.0.1:4002, 3=127.0.0.1:4003,").expect("parse");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].id, 2);
        assert_eq!(peers[1].address, "127.0.0.1:4003");
    }

    #[test]
    fn parse_peers_rejects_malformed_entries() {
        assert!(matches!(
            parse_peers("2:127.0.0.1:4002"),
            Err(ConfigError::InvalidPeer(_))
        ));
        assert!(matches!(
            parse_peers("two=127.0.0.1:4002"),
            Err(ConfigError::InvalidPeer(_))
        ));
        assert!(matches!(parse_peers("2="), Err(ConfigError::InvalidPeer(_))));
    }

    #[test]
    fn validate_rejects_self_and_duplicate_peers() {
        let mut cfg = Config::default();
        cfg.peers = parse_peers("1=127.0.0.1:4009").unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicatePeer(1))));

        cfg.peers = parse_peers("2=a:1,2=b:2").unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicatePeer(2))));

        cfg.peers.clear();
        cfg.node_id = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidNodeId(0))));
    }

    #[test]
    fn directory_includes_self_and_peers() {
        let mut cfg = Config::default();
        cfg.node_id = 2;
        cfg.peers = parse_peers("1=a:1,3=c:3").unwrap();

        let dir = cfg.directory();
        let ids: Vec<NodeId> = dir.all_peers().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(dir.get(2).map(|n| n.display_name.as_str()), Some("Server 2"));
    }

    #[test]
    fn from_file_fills_missing_fields_with_defaults() {
        let mut file = NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"node_id": 3, "address": "127.0.0.1:4003",
                "peers": [{{"id": 1, "address": "127.0.0.1:4001"}}],
                "timing": {{"heartbeat_interval": 250}}}}"#
        )
        .expect("write");

        let cfg = Config::from_file(file.path()).expect("load");
        assert_eq!(cfg.node_id, 3);
        assert_eq!(cfg.peers.len(), 1);
        assert_eq!(cfg.timing.heartbeat_interval, 250);
        assert_eq!(cfg.timing.probe_interval, 10_000);
    }
}
