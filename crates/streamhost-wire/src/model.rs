use core::fmt;
use serde::{Deserialize, Serialize};

/// Session lifecycle status as announced by the client.
///
/// The client is the authoritative source; the host never invents a
/// transition. Serialized as the uppercase wire tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Waiting,
    Connecting,
    Connected,
    Paused,
    Disconnected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            SessionStatus::Waiting => "WAITING",
            SessionStatus::Connecting => "CONNECTING",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Disconnected => "DISCONNECTED",
        };
        f.write_str(token)
    }
}

/// Snapshot of the media service's observable state.
///
/// Equality is field-wise; the poller relies on that to detect changes.
/// The all-false default doubles as the "service not running" snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaServiceState {
    pub openxr_runtime_running: bool,
    pub client_connected: bool,
    pub game_connected: bool,
}

/// Pairing credentials rendered into the QR code shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodePayload {
    pub client_token: String,
    pub certificate_fingerprint: String,
}

/// The single active session owned by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInformation {
    pub session_id: String,
    pub client_id: String,
    pub barcode: BarcodePayload,
}

/// Stable per-host server identifier: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerId(String);

/// Error produced when a candidate server id is not 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid server id {0:?}: expected 32 lowercase hex characters")]
pub struct InvalidServerId(pub String);

impl ServerId {
    pub fn parse(value: &str) -> Result<Self, InvalidServerId> {
        let valid = value.len() == 32
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(ServerId(value.to_owned()))
        } else {
            Err(InvalidServerId(value.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServerId {
    type Error = InvalidServerId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ServerId::parse(&value)
    }
}

impl From<ServerId> for String {
    fn from(id: ServerId) -> String {
        id.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tokens_are_uppercase() {
        let json = serde_json::to_string(&SessionStatus::Waiting).unwrap();
        assert_eq!(json, "\"WAITING\"");
        let parsed: SessionStatus = serde_json::from_str("\"DISCONNECTED\"").unwrap();
        assert_eq!(parsed, SessionStatus::Disconnected);
    }

    #[test]
    fn lowercase_status_token_is_rejected() {
        assert!(serde_json::from_str::<SessionStatus>("\"waiting\"").is_err());
    }

    #[test]
    fn media_state_equality_is_field_wise() {
        let a = MediaServiceState {
            openxr_runtime_running: true,
            client_connected: false,
            game_connected: false,
        };
        let b = MediaServiceState {
            openxr_runtime_running: true,
            ..Default::default()
        };
        assert_eq!(a, b);
        assert_ne!(a, MediaServiceState::default());
    }

    #[test]
    fn server_id_accepts_exactly_32_lowercase_hex() {
        assert!(ServerId::parse("0123456789abcdef0123456789abcdef").is_ok());
        assert!(ServerId::parse("0123456789ABCDEF0123456789ABCDEF").is_err());
        assert!(ServerId::parse("0123456789abcdef").is_err());
        assert!(ServerId::parse("0123456789abcdef0123456789abcdeg").is_err());
    }
}
