use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::body::Bytes;
use hyper::{header, Body, Client, Method, Request, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{
    Ack, ClockSyncRequest, ClockSyncResponse, ElectionRequest, HealthResponse, LeaderUpdate,
    NetworkError, PeerTransport,
};
use crate::cluster::{Node, ReplicationEvent};

/// JSON-over-HTTP transport to other nodes' [`http_api`](super::http_api).
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn uri(address: &str, path: &str) -> Result<Uri, NetworkError> {
        format!("http://{address}{path}")
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| NetworkError::RequestError(e.to_string()))
    }

    async fn send_raw(&self, request: Request<Body>) -> Result<Bytes, NetworkError> {
        let response = self.client.request(request).await?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;

        if !status.is_success() {
            return Err(NetworkError::RpcError(format!(
                "{}: {}",
                status,
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(bytes)
    }

    async fn send<R: DeserializeOwned>(&self, request: Request<Body>) -> Result<R, NetworkError> {
        let bytes = self.send_raw(request).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn get_request(address: &str, path: &str) -> Result<Request<Body>, NetworkError> {
        Request::builder()
            .method(Method::GET)
            .uri(Self::uri(address, path)?)
            .body(Body::empty())
            .map_err(|e| NetworkError::RequestError(e.to_string()))
    }

    /// GET a non-JSON body, e.g. `/metrics`.
    pub async fn get_text(&self, address: &str, path: &str) -> Result<String, NetworkError> {
        let bytes = self.send_raw(Self::get_request(address, path)?).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        address: &str,
        path: &str,
    ) -> Result<R, NetworkError> {
        self.send(Self::get_request(address, path)?).await
    }

    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        address: &str,
        path: &str,
        body: &B,
    ) -> Result<R, NetworkError> {
        let payload = serde_json::to_vec(body)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(Self::uri(address, path)?)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .map_err(|e| NetworkError::RequestError(e.to_string()))?;
        self.send(request).await
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn election(&self, peer: &Node, request: ElectionRequest) -> Result<Ack, NetworkError> {
        self.post_json(&peer.address, "/election", &request).await
    }

    async fn leader_update(&self, peer: &Node, update: LeaderUpdate) -> Result<Ack, NetworkError> {
        self.post_json(&peer.address, "/leader-update", &update).await
    }

    async fn clock_sync(
        &self,
        peer: &Node,
        request: ClockSyncRequest,
    ) -> Result<ClockSyncResponse, NetworkError> {
        self.post_json(&peer.address, "/clock-sync", &request).await
    }

    async fn replicate(&self, peer: &Node, event: &ReplicationEvent) -> Result<Ack, NetworkError> {
        match event {
            ReplicationEvent::BookingCreated(booking) => {
                self.post_json(&peer.address, "/replicate/booking", booking)
                    .await
            }
            ReplicationEvent::SlotMarkedUnavailable(slot) => {
                self.post_json(&peer.address, "/replicate/slot", slot).await
            }
        }
    }

    async fn health(&self, peer: &Node) -> Result<HealthResponse, NetworkError> {
        self.get_json(&peer.address, "/health").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_is_built_from_address_and_path() {
        let uri = HttpTransport::uri("127.0.0.1:4002", "/replicate/slot").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:4002/replicate/slot");
    }

    #[test]
    fn invalid_address_is_a_request_error() {
        let err = HttpTransport::uri("bad host", "/health").unwrap_err();
        assert!(matches!(err, NetworkError::RequestError(_)));
    }

    #[tokio::test]
    async fn closed_port_is_a_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new();
        let peer = Node::new(2, addr.to_string(), None);
        let res = transport.health(&peer).await;
        assert!(matches!(res, Err(NetworkError::ConnectionError(_))));
    }
}
