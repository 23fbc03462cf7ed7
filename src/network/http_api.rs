use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use hyper::body::HttpBody as _;
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use super::{
    metrics, ClockSyncRequest, ElectionRequest, LeaderUpdate, NetworkError, NewBooking,
    SimulateLoadRequest,
};
use crate::cluster::{ClusterError, ClusterNode, NodeRole, ReplicationEvent, SlotUnavailable};
use crate::store::{Booking, StoreError};

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

fn max_body_bytes() -> usize {
    std::env::var("DOCKET_HTTP_MAX_BODY_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MAX_BODY_BYTES)
}

pub async fn run_http_api(addr: SocketAddr, node: Arc<ClusterNode>) -> Result<(), NetworkError> {
    let listener =
        TcpListener::bind(addr).map_err(|e| NetworkError::ConnectionError(e.to_string()))?;
    serve(listener, node).await
}

/// Serve the node's endpoints on an already bound listener.
pub async fn serve(listener: TcpListener, node: Arc<ClusterNode>) -> Result<(), NetworkError> {
    let max_body = max_body_bytes();
    if let Ok(addr) = listener.local_addr() {
        info!("Node {} serving HTTP on {}", node.id(), addr);
    }

    let make_svc = make_service_fn(move |_conn| {
        let node = Arc::clone(&node);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let node = Arc::clone(&node);
                async move { handle(req, node, max_body).await }
            }))
        }
    });

    Server::from_tcp(listener)?.serve(make_svc).await?;
    Ok(())
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn json_error(status: StatusCode, msg: &str) -> Response<Body> {
    respond(
        status,
        "application/json",
        json!({ "error": msg }).to_string(),
    )
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => respond(status, "application/json", bytes),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to encode response: {e}"),
        ),
    }
}

fn cluster_error(err: &ClusterError) -> Response<Body> {
    let status = match err {
        ClusterError::Store(StoreError::Unavailable(_)) | ClusterError::SyncUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, &err.to_string())
}

enum ReadBodyLimitedError {
    TooLarge,
    Hyper(hyper::Error),
}

impl From<hyper::Error> for ReadBodyLimitedError {
    fn from(e: hyper::Error) -> Self {
        Self::Hyper(e)
    }
}

async fn read_body_limited(
    mut body: Body,
    max_bytes: usize,
) -> Result<Vec<u8>, ReadBodyLimitedError> {
    let mut out = Vec::new();
    while let Some(next) = body.data().await {
        let chunk = next?;
        if out.len() + chunk.len() > max_bytes {
            return Err(ReadBodyLimitedError::TooLarge);
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Read and decode a JSON body, or produce the error response to send back.
async fn read_json<T: DeserializeOwned>(
    req: Request<Body>,
    max_bytes: usize,
) -> Result<T, Response<Body>> {
    let too_large = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map(|len| len > max_bytes)
        .unwrap_or(false);
    if too_large {
        return Err(json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"));
    }

    let bytes = match read_body_limited(req.into_body(), max_bytes).await {
        Ok(bytes) => bytes,
        Err(ReadBodyLimitedError::TooLarge) => {
            return Err(json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"))
        }
        Err(ReadBodyLimitedError::Hyper(e)) => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
            ))
        }
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, &format!("invalid JSON: {e}")))
}

fn query_param<'a>(req: &'a Request<Body>, key: &str) -> Option<&'a str> {
    req.uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

async fn handle(
    req: Request<Body>,
    node: Arc<ClusterNode>,
    max_body: usize,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::POST, "/election") => match read_json::<ElectionRequest>(req, max_body).await {
            Ok(request) => json_response(StatusCode::OK, &node.handle_election(request).await),
            Err(resp) => resp,
        },
        (Method::POST, "/leader-update") => match read_json::<LeaderUpdate>(req, max_body).await {
            Ok(update) => json_response(StatusCode::OK, &node.handle_leader_update(update).await),
            Err(resp) => resp,
        },
        (Method::POST, "/clock-sync") => match read_json::<ClockSyncRequest>(req, max_body).await {
            Ok(request) => json_response(StatusCode::OK, &node.handle_clock_sync(request)),
            Err(resp) => resp,
        },
        (Method::GET, "/clock-sync") => {
            match query_param(&req, "clientTime").and_then(|v| v.parse::<i64>().ok()) {
                Some(client_time) => json_response(
                    StatusCode::OK,
                    &node.handle_clock_sync(ClockSyncRequest { client_time }),
                ),
                None => json_error(StatusCode::BAD_REQUEST, "clientTime query parameter required"),
            }
        }
        (Method::POST, "/replicate/booking") => match read_json::<Booking>(req, max_body).await {
            Ok(booking) => replicated(&node, ReplicationEvent::BookingCreated(booking)).await,
            Err(resp) => resp,
        },
        (Method::POST, "/replicate/slot") => {
            match read_json::<SlotUnavailable>(req, max_body).await {
                Ok(slot) => replicated(&node, ReplicationEvent::SlotMarkedUnavailable(slot)).await,
                Err(resp) => resp,
            }
        }
        (Method::GET, "/health") => json_response(StatusCode::OK, &node.health()),
        (Method::GET, "/servers") => json_response(StatusCode::OK, &node.servers().await),
        (Method::GET, "/leader") => json_response(StatusCode::OK, &node.leader().await),
        (Method::POST, "/election/start") => {
            json_response(StatusCode::OK, &node.trigger_election().await)
        }
        (Method::GET, "/clock") => json_response(StatusCode::OK, &node.clock_status()),
        (Method::POST, "/clock/sync") => match node.sync_clock_once().await {
            Ok(Some(exchange)) => json_response(
                StatusCode::OK,
                &json!({
                    "synced": true,
                    "rtt": exchange.round_trip_time,
                    "adjustedTime": exchange.adjusted_time,
                    "offsetMs": node.clock_status().offset_ms,
                }),
            ),
            Ok(None) => json_response(
                StatusCode::OK,
                &json!({ "synced": false, "offsetMs": node.clock_status().offset_ms }),
            ),
            Err(e) => {
                warn!("Manual clock sync on node {} failed: {}", node.id(), e);
                cluster_error(&e)
            }
        },
        (Method::POST, "/bookings") => match read_json::<NewBooking>(req, max_body).await {
            Ok(request) => match node.create_booking(request).await {
                Ok((booking, report)) => json_response(
                    StatusCode::CREATED,
                    &json!({ "booking": booking, "replication": report }),
                ),
                Err(e) => cluster_error(&e),
            },
            Err(resp) => resp,
        },
        (Method::POST, "/slots/unavailable") => {
            match read_json::<SlotUnavailable>(req, max_body).await {
                Ok(slot) => match node.mark_slot_unavailable(slot).await {
                    Ok(report) => {
                        json_response(StatusCode::OK, &json!({ "replication": report }))
                    }
                    Err(e) => cluster_error(&e),
                },
                Err(resp) => resp,
            }
        }
        (Method::POST, "/simulate-load") => {
            match read_json::<SimulateLoadRequest>(req, max_body).await {
                Ok(request) => json_response(StatusCode::OK, &node.simulate_load(request).await),
                Err(resp) => resp,
            }
        }
        (Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            build_metrics(&node).await,
        ),
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

async fn replicated(node: &ClusterNode, event: ReplicationEvent) -> Response<Body> {
    let ack = node.handle_replicated(event).await;
    let status = if ack.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    json_response(status, &ack)
}

async fn build_metrics(node: &ClusterNode) -> String {
    let counters = metrics::snapshot();
    let role_value = match node.leader().await.role {
        NodeRole::Follower => 0,
        NodeRole::Candidate => 1,
        NodeRole::Leader => 2,
    };
    let clock = node.clock_status();

    format!(
        concat!(
            "# TYPE docket_elections_started_total counter\n",
            "docket_elections_started_total {}\n",
            "# TYPE docket_elections_won_total counter\n",
            "docket_elections_won_total {}\n",
            "# TYPE docket_replication_events_total counter\n",
            "docket_replication_events_total{{outcome=\"delivered\"}} {}\n",
            "docket_replication_events_total{{outcome=\"failed\"}} {}\n",
            "# TYPE docket_probe_failures_total counter\n",
            "docket_probe_failures_total {}\n",
            "# TYPE docket_clock_syncs_total counter\n",
            "docket_clock_syncs_total {}\n",
            "# TYPE docket_node_role gauge\n",
            "docket_node_role {}\n",
            "# TYPE docket_clock_offset_ms gauge\n",
            "docket_clock_offset_ms {}\n",
            "# TYPE docket_active_connections gauge\n",
            "docket_active_connections {}\n",
        ),
        counters.elections_started,
        counters.elections_won,
        counters.replication_delivered,
        counters.replication_failed,
        counters.probe_failures,
        counters.clock_syncs,
        role_value,
        clock.offset_ms,
        node.gauge().active(),
    )
}
