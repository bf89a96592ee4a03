//! Typed capability facade over the media service's control RPC.
//!
//! The media service exposes a versioned pipe-backed RPC endpoint; the host
//! consumes it exclusively through [`MediaServiceRpc`]. `connect` is
//! idempotent and invoked lazily by every other operation. `query_status`
//! answers `None` (not an error) while the service is not running;
//! `issue_client_token` and `certificate_fingerprint` are only meaningful
//! while it is.

#[cfg(unix)]
mod pipe;

#[cfg(unix)]
pub use pipe::PipeMediaServiceRpc;

use async_trait::async_trait;
use streamhost_wire::MediaServiceState;
use thiserror::Error;

/// Service version the host always starts the media service with.
pub const MEDIA_SERVICE_VERSION: &str = "6.0.0";

#[derive(Debug, Error)]
pub enum RpcError {
    /// The control endpoint cannot be reached at all.
    #[error("media service RPC endpoint is unavailable")]
    Unavailable,

    /// The endpoint answered, but the operation failed.
    #[error("media service call failed: {0}")]
    CallFailed(String),
}

pub type RpcResult<T> = core::result::Result<T, RpcError>;

/// Digest algorithm for the streaming certificate fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintAlgorithm {
    #[default]
    Sha256,
}

impl FingerprintAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintAlgorithm::Sha256 => "SHA256",
        }
    }
}

#[async_trait]
pub trait MediaServiceRpc: Send + Sync {
    /// Establishes the control connection. Safe to call repeatedly.
    async fn connect(&self) -> RpcResult<()>;

    /// Starts the streaming service at the given service version.
    async fn start_service(&self, version: &str) -> RpcResult<()>;

    async fn stop_service(&self) -> RpcResult<()>;

    /// Snapshot of the service state, or `None` while it is not running.
    async fn query_status(&self) -> RpcResult<Option<MediaServiceState>>;

    /// Derives the pairing token for a client identity.
    async fn issue_client_token(&self, client_id: &str) -> RpcResult<String>;

    /// Hex digest of the streaming certificate.
    async fn certificate_fingerprint(&self, algorithm: FingerprintAlgorithm) -> RpcResult<String>;

    async fn close(&self) -> RpcResult<()>;
}
