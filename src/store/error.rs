use thiserror::Error;

use crate::cluster::NodeId;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown server: {0}")]
    UnknownServer(NodeId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
