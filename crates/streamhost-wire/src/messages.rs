use serde::{Deserialize, Serialize};

use crate::{ServerId, SessionStatus};

/// Event names used for dispatch after the header parse.
pub const EVENT_REQUEST_CONNECTION: &str = "RequestConnection";
pub const EVENT_REQUEST_BARCODE_PRESENTATION: &str = "RequestBarcodePresentation";
pub const EVENT_SESSION_STATUS_DID_CHANGE: &str = "SessionStatusDidChange";
pub const EVENT_REQUEST_SESSION_DISCONNECT: &str = "RequestSessionDisconnect";

/// Loose first-pass parse of an inbound record.
///
/// Only the discriminator and session id are pulled out; everything else in
/// the object is ignored at this stage. Either field may be absent, in which
/// case the record is dropped by the engine without closing the connection.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "Event")]
    pub event: Option<String>,
    #[serde(rename = "SessionID")]
    pub session_id: Option<String>,
}

/// `RequestConnection` — the client's opening move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConnection {
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "StreamingProvider")]
    pub streaming_provider: String,
    #[serde(rename = "StreamingProviderVersion")]
    pub streaming_provider_version: String,
    #[serde(rename = "UserInterfaceIdiom")]
    pub user_interface_idiom: String,
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "ClientID")]
    pub client_id: String,
}

/// `RequestBarcodePresentation` — the client asks the host to show the QR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBarcodePresentation {
    #[serde(rename = "SessionID")]
    pub session_id: String,
}

/// `SessionStatusDidChange` — the client announces a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusDidChange {
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "Status")]
    pub status: SessionStatus,
}

/// `RequestSessionDisconnect` as received from the client. The same event is
/// also sent by the host; the outbound form lives in [`ServerMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSessionDisconnect {
    #[serde(rename = "SessionID")]
    pub session_id: String,
}

/// Host-to-client messages. The enum tag serializes as the `Event` field, so
/// each variant produces exactly the wire object for that event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Event")]
pub enum ServerMessage {
    AcknowledgeConnection {
        #[serde(rename = "SessionID")]
        session_id: String,
        #[serde(rename = "ServerID")]
        server_id: ServerId,
        /// Omitted entirely (never serialized as `null`) when the host wants
        /// to force the client through the QR pairing flow.
        #[serde(
            rename = "CertificateFingerprint",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        certificate_fingerprint: Option<String>,
    },
    AcknowledgeBarcodePresentation {
        #[serde(rename = "SessionID")]
        session_id: String,
    },
    MediaStreamIsReady {
        #[serde(rename = "SessionID")]
        session_id: String,
    },
    RequestSessionDisconnect {
        #[serde(rename = "SessionID")]
        session_id: String,
    },
}

impl ServerMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ServerMessage::AcknowledgeConnection { session_id, .. }
            | ServerMessage::AcknowledgeBarcodePresentation { session_id }
            | ServerMessage::MediaStreamIsReady { session_id }
            | ServerMessage::RequestSessionDisconnect { session_id } => session_id,
        }
    }
}
