//! Wire schema for the streamhost session-management protocol.
//!
//! Every record on the wire is a JSON object carrying an `Event` discriminator
//! and a `SessionID`. Parsing is a two-step affair: [`MessageHeader`] is the
//! loose first pass that only pulls out those two fields (tolerating anything
//! else), after which the caller dispatches on the event name and parses the
//! concrete struct. Outbound messages are modelled as [`ServerMessage`], a
//! tagged enum that serializes the `Event` field automatically.

mod messages;
mod model;

pub use messages::*;
pub use model::*;

/// The only protocol version this host speaks.
pub const PROTOCOL_VERSION: &str = "1";
