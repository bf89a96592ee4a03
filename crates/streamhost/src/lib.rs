//! Host-side endpoint of the remote-rendering handshake.
//!
//! The host advertises itself on the local link as a streaming target,
//! accepts one head-mounted or handheld client at a time over a framed-JSON
//! TCP protocol, drives the pairing/acknowledge handshake with credentials
//! sourced from the media service, and keeps the co-resident media-service
//! child process alive while a session runs. UI concerns stay behind the
//! [`presenter::Presenter`] seam; media transport itself belongs to the
//! external service, not this crate.

pub mod advertiser;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod logsink;
pub mod poller;
pub mod presenter;
pub mod rpc;
pub mod session;
pub mod supervisor;

pub use config::HostConfig;
pub use coordinator::{HostParts, PartsFactory, SessionCoordinator};
pub use error::{HostError, HostResult};

pub use streamhost_transport as transport;
pub use streamhost_wire as wire;
