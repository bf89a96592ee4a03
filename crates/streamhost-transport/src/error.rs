use crate::cancellation::CancellationError;
use std::io::Error as IoError;
use thiserror::Error;

pub type TransportResult<T> = core::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Clean EOF at a frame boundary, or a zero-byte read mid-frame.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The cancellation token fired while a frame operation was suspended.
    #[error("operation canceled")]
    Canceled,

    /// Oversized or non-UTF-8 frame; the connection must be closed.
    #[error("bad frame: {reason}")]
    BadFrame { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl TransportError {
    pub(crate) fn oversized(len: u32) -> Self {
        TransportError::BadFrame {
            reason: format!("declared length {len} exceeds maximum {}", crate::MAX_FRAME_LEN),
        }
    }
}

impl From<CancellationError> for TransportError {
    /// A closed cancellation channel means the owning component is gone;
    /// treat it the same as a fired token so waiters unwind.
    fn from(_: CancellationError) -> Self {
        TransportError::Canceled
    }
}
