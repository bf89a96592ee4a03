use core::fmt;
use std::net::SocketAddr;

use streamhost_wire::{BarcodePayload, SessionInformation, SessionStatus};

/// State of the mDNS advertisement, surfaced as the Bonjour indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BonjourStatus {
    Running,
    Error(String),
}

impl fmt::Display for BonjourStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BonjourStatus::Running => f.write_str("Running"),
            BonjourStatus::Error(message) => write!(f, "Error ({message})"),
        }
    }
}

/// Media-service indicator derived from the polled service state.
///
/// `Running` requires the OpenXR runtime, the client, and the game all
/// connected; a partial set is `Paused` with the missing pieces named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionManagementStatus {
    Stopped { listening: SocketAddr },
    Paused { details: String },
    Running,
}

impl fmt::Display for SessionManagementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionManagementStatus::Stopped { listening } => {
                write!(f, "Stopped (Listening on {listening})")
            }
            SessionManagementStatus::Paused { details } => write!(f, "Paused ({details})"),
            SessionManagementStatus::Running => f.write_str("Running"),
        }
    }
}

/// Outbound events to whatever UI or log surface observes the host.
///
/// Implementations are responsible for their own thread affinity; the core
/// never invokes these callbacks while holding an internal lock, so a
/// presenter is free to marshal onto a UI thread synchronously.
pub trait Presenter: Send + Sync {
    /// A session was established and its pairing payload is ready; render
    /// the QR image now so a later presentation request is instant.
    fn generate_barcode(&self, payload: &BarcodePayload);

    /// The client announced a session lifecycle transition.
    fn session_status_did_change(&self, status: SessionStatus);

    /// The client asked the host to show the pairing QR code.
    fn barcode_presentation_requested(&self, session: &SessionInformation);

    /// A connection attempt was rejected (for example a protocol version
    /// mismatch) or a protocol step failed.
    fn connection_error_occurred(&self, message: &str);

    /// The mDNS advertisement changed state.
    fn bonjour_status_did_change(&self, status: &BonjourStatus);

    /// The media-service indicator changed state.
    fn session_management_status_did_change(&self, status: &SessionManagementStatus);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_indicator_names_the_endpoint() {
        let status = SessionManagementStatus::Stopped {
            listening: "0.0.0.0:55000".parse().unwrap(),
        };
        assert_eq!(status.to_string(), "Stopped (Listening on 0.0.0.0:55000)");
    }

    #[test]
    fn paused_indicator_carries_details() {
        let status = SessionManagementStatus::Paused {
            details: "waiting for game".into(),
        };
        assert_eq!(status.to_string(), "Paused (waiting for game)");
    }
}
