//! Length-prefixed framing for the TCP game channel.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 BE  │ len bytes of UTF-8 JSON      │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! The reader checks the length before allocating anything: a prefix of
//! zero or above [`MAX_FRAME_SIZE`] fails without touching the body, and
//! the connection is expected to be closed by the caller. A stream that
//! ends cleanly between frames yields `Ok(None)`; one that ends inside a
//! frame is [`FrameError::Truncated`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::FrameError;

/// Largest payload a frame may carry (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Builds a complete frame (prefix + payload) in one buffer.
///
/// Host relay uses this to frame a payload once and write the same bytes
/// to every other peer.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::Oversized(payload.len()));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::Oversized(payload.len()))?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Writes one frame and flushes.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the stream ends on a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix);
    if len == 0 || len as usize > MAX_FRAME_SIZE {
        return Err(FrameError::InvalidLength(len));
    }

    let mut body = vec![0u8; len as usize];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(Some(body)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FrameError::Truncated)
        }
        Err(e) => Err(FrameError::Io(e)),
    }
}
