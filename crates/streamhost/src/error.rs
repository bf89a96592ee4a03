use streamhost_transport::TransportError;
use streamhost_wire::InvalidServerId;
use thiserror::Error;
use tokio::task::JoinError;

use crate::rpc::RpcError;

pub type HostResult<T> = core::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    /// Startup validation failure. The only error that refuses to start the
    /// host; everything below it is survivable.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("media service RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Join(#[from] JoinError),

    #[error("service advertisement failed: {0}")]
    Advertise(String),

    #[error("server identity error: {0}")]
    Identity(#[from] InvalidServerId),
}

impl HostError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        HostError::InvalidConfiguration {
            message: message.into(),
        }
    }
}
