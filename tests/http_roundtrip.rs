mod common;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use common::{config_for, eventually};
use docket::cluster::Node;
use docket::common::SystemClock;
use docket::network::http_api::serve;
use docket::network::{ClockSyncRequest, NewBooking, ServersResponse};
use docket::{BookingStore, ClusterNode, HttpTransport, MemoryStore, NodeRole, PeerTransport};
use serde_json::Value;
use tokio::task::JoinHandle;

struct Served {
    nodes: Vec<Arc<ClusterNode>>,
    bookings: Vec<Arc<MemoryStore>>,
    addresses: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Served {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Two nodes on ephemeral ports talking over real HTTP.
fn serve_pair() -> Served {
    let listeners: Vec<TcpListener> = (0..2)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("bind"))
        .collect();
    let addresses: Vec<String> = listeners
        .iter()
        .map(|l| l.local_addr().expect("local_addr").to_string())
        .collect();
    let lookup = {
        let addresses = addresses.clone();
        move |id: u64| addresses[(id - 1) as usize].clone()
    };

    let servers = Arc::new(MemoryStore::new([1, 2]));
    let transport = Arc::new(HttpTransport::new());

    let mut nodes = Vec::new();
    let mut bookings = Vec::new();
    let mut tasks = Vec::new();
    for (listener, id) in listeners.into_iter().zip([1u64, 2]) {
        let store = Arc::new(MemoryStore::new([1, 2]));
        let node = Arc::new(ClusterNode::new(
            &config_for(id, &[1, 2], &lookup),
            transport.clone(),
            servers.clone(),
            store.clone(),
            Arc::new(SystemClock),
        ));
        let served = Arc::clone(&node);
        tasks.push(tokio::spawn(async move {
            let _ = serve(listener, served).await;
        }));
        nodes.push(node);
        bookings.push(store);
    }

    Served {
        nodes,
        bookings,
        addresses,
        tasks,
    }
}

#[tokio::test]
async fn election_over_http_elects_higher_node() {
    let served = serve_pair();

    // Node 2 answers "alive", then contests and announces itself.
    served.nodes[0].trigger_election().await;

    let first = &served.nodes[0];
    let settled = eventually(Duration::from_secs(3), move || async move {
        first.leader().await.leader_id == Some(2)
    })
    .await;
    assert!(settled, "node 1 never saw leader 2");
    assert_eq!(served.nodes[1].leader().await.role, NodeRole::Leader);

    let client = HttpTransport::new();
    let leader: Value = client
        .get_json(&served.addresses[0], "/leader")
        .await
        .expect("GET /leader");
    assert_eq!(leader["leaderId"], 2);
    assert_eq!(leader["role"], "Follower");
}

#[tokio::test]
async fn booking_posted_to_one_node_is_replicated_over_http() {
    let served = serve_pair();
    let client = HttpTransport::new();

    let created: Value = client
        .post_json(
            &served.addresses[1],
            "/bookings",
            &NewBooking {
                doctor_id: 2,
                patient_name: "Noor".to_string(),
                slot_time: "08:45".to_string(),
            },
        )
        .await
        .expect("POST /bookings");
    assert_eq!(created["booking"]["serverId"], 2);
    assert_eq!(created["replication"]["delivered"][0], 1);

    let replica = served.bookings[0].bookings().await.unwrap();
    assert_eq!(replica.len(), 1);
    assert_eq!(replica[0].patient_name, "Noor");
    assert!(!served.bookings[0].is_slot_available(2, "08:45").await.unwrap());
}

#[tokio::test]
async fn health_clock_sync_and_status_answer_over_http() {
    let served = serve_pair();
    let transport = HttpTransport::new();
    let peer = Node::new(2, served.addresses[1].clone(), None);

    let health = transport.health(&peer).await.expect("health");
    assert_eq!(health.status, "ok");
    assert_eq!(health.server_id, 2);

    let sent = wall_now();
    let sync = transport
        .clock_sync(&peer, ClockSyncRequest { client_time: sent })
        .await
        .expect("clock sync");
    assert!(sync.server_time >= sent);

    let via_get: Value = transport
        .get_json(&served.addresses[1], &format!("/clock-sync?clientTime={sent}"))
        .await
        .expect("GET clock sync");
    assert!(via_get["serverTime"].as_i64().unwrap() >= sent);

    let status: ServersResponse = transport
        .get_json(&served.addresses[0], "/servers")
        .await
        .expect("servers");
    assert_eq!(status.server, 1);
    assert_eq!(status.data.len(), 2);

    let metrics = transport
        .get_text(&served.addresses[0], "/metrics")
        .await
        .expect("metrics");
    assert!(metrics.contains("docket_node_role"));
}

fn wall_now() -> i64 {
    use docket::common::Clock;
    SystemClock.now_ms()
}
