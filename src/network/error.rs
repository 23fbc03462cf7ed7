use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Invalid request: {0}")]
    RequestError(String),

    #[error("Decode error: {0}")]
    DecodeError(#[from] serde_json::Error),

    #[error("Timeout error")]
    TimeoutError,
}

impl From<hyper::Error> for NetworkError {
    fn from(err: hyper::Error) -> Self {
        NetworkError::ConnectionError(err.to_string())
    }
}
