use std::pin::Pin;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::cancellation::CancellationToken;
use crate::error::{TransportError, TransportResult};

/// Upper bound on a frame's declared payload length. The protocol floor is
/// 64 KiB; anything above this is a malformed or hostile peer.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

const LEN_PREFIX_SIZE: usize = 4;

/// Reads one length-prefixed frame and returns the validated UTF-8 payload.
///
/// Reads exactly four little-endian length bytes, then exactly that many
/// payload bytes, looping on partial reads. A clean EOF at the frame
/// boundary, or a zero-byte read mid-frame, surfaces as
/// [`TransportError::PeerClosed`]. The token unblocks the read promptly with
/// [`TransportError::Canceled`]. Oversized or non-UTF-8 payloads are
/// [`TransportError::BadFrame`]; the caller is expected to drop the
/// connection on those.
pub async fn read_frame<R>(reader: &mut R, cancel: &CancellationToken) -> TransportResult<String>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    read_exact_cancellable(reader, &mut len_buf, cancel).await?;

    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        tracing::debug!(declared = len, max = MAX_FRAME_LEN, "rejecting oversized frame");
        return Err(TransportError::oversized(len));
    }

    let mut payload = vec![0u8; len as usize];
    read_exact_cancellable(reader, &mut payload, cancel).await?;

    String::from_utf8(payload).map_err(|err| TransportError::BadFrame {
        reason: format!("payload is not valid UTF-8: {err}"),
    })
}

async fn read_exact_cancellable<R>(
    reader: &mut R,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> TransportResult<()>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(TransportError::Canceled),
        result = reader.read_exact(buf) => match result {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TransportError::PeerClosed)
            }
            Err(err) => Err(err.into()),
        },
    }
}

/// Serialized frame writer for one stream.
///
/// All writers for a connection share this value; the internal mutex makes
/// each frame atomic with respect to the others. The length prefix and
/// payload are assembled into one buffer and written in a single call while
/// the lock is held.
pub struct FrameWriter {
    inner: Mutex<Pin<Box<dyn AsyncWrite + Send + Sync>>>,
}

impl FrameWriter {
    pub fn new(writable: Pin<Box<dyn AsyncWrite + Send + Sync>>) -> Self {
        Self {
            inner: Mutex::new(writable),
        }
    }

    /// Writes one frame: little-endian length, then the payload, flushed
    /// before the stream lock is released.
    pub async fn write_frame(&self, payload: &[u8], cancel: &CancellationToken) -> TransportResult<()> {
        if payload.len() as u64 > MAX_FRAME_LEN as u64 {
            return Err(TransportError::BadFrame {
                reason: format!(
                    "outbound payload of {} bytes exceeds maximum {MAX_FRAME_LEN}",
                    payload.len()
                ),
            });
        }

        let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);

        let mut writable = self.inner.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Canceled),
            result = async {
                writable.write_all(&buf).await?;
                writable.flush().await
            } => result.map_err(TransportError::from),
        }
    }
}
