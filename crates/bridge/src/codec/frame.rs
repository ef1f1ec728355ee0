//! Native-messaging framing: a 4-byte little-endian `u32` length followed by
//! that many bytes of UTF-8 JSON, no trailing delimiter.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use tabreader_core::message::{self, Message};
use tabreader_core::{Error, Result};

/// Bodies are read in pieces of at most this size so a bogus length prefix
/// cannot force a single huge allocation.
pub const READ_CHUNK_BYTES: usize = 1024 * 1024;

/// Inbound frames above this size are still accepted but logged.
pub const LARGE_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Browsers drop host-to-extension messages larger than this.
pub const MAX_OUTBOUND_BYTES: usize = 1024 * 1024;

/// Length prefix plus JSON payload, ready for a single write.
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::Protocol(format!(
            "frame of {} bytes does not fit a 32-bit length prefix",
            payload.len()
        ))
    })?;
    if payload.len() > MAX_OUTBOUND_BYTES {
        warn!(
            len = payload.len(),
            max = MAX_OUTBOUND_BYTES,
            "Outbound frame exceeds the browser's native messaging limit"
        );
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one frame and flush. The codec does not lock: concurrent writers
/// must be serialized by the caller.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream, including a close in
/// the middle of a frame. A payload that is not a JSON object yields
/// `Error::Protocol`; the frame has been consumed in full, so the caller may
/// keep reading.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(header) as usize;
    debug!(len, "Receiving frame");
    if len > LARGE_FRAME_BYTES {
        warn!(
            len,
            mb = len / (1024 * 1024),
            "Receiving very large frame"
        );
    }

    let mut payload = Vec::with_capacity(len.min(READ_CHUNK_BYTES));
    let mut chunk = vec![0u8; len.min(READ_CHUNK_BYTES)];
    while payload.len() < len {
        let want = (len - payload.len()).min(READ_CHUNK_BYTES);
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            warn!(
                got = payload.len(),
                expected = len,
                "Stream closed in the middle of a frame"
            );
            return Ok(None);
        }
        payload.extend_from_slice(&chunk[..n]);
    }

    message::parse(&payload)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("invalid frame payload: {}", e)))
}
