//! Transport layer for the streamhost session protocol.
//!
//! Frames on the wire are a little-endian 4-byte length followed by that many
//! bytes of UTF-8 JSON. This crate owns reading and writing those frames with
//! prompt cancellation, and the watch-channel cancellation token the rest of
//! the host threads through every suspendable operation. JSON interpretation
//! is the protocol engine's job; the codec only guarantees well-formed UTF-8.

pub mod error;

mod cancellation;
mod frame;

pub use cancellation::{CancellationError, CancellationToken, CancellationTokenSource};
pub use error::{TransportError, TransportResult};
pub use frame::{read_frame, FrameWriter, MAX_FRAME_LEN};
