//! Length-prefixed JSON framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. Reading and decoding are separate steps so the read loop can still
//! answer a request whose body fails to decode.

use crate::error::TransportError;
use crate::packet::{Frame, RequestId};
use serde_json::Value;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encodes and writes one frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(frame)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            size: bytes.len(),
            limit: MAX_FRAME_LEN,
        });
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the raw bytes of one frame; `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_LEN,
        });
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(Some(buffer))
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Recovers the frame type and correlation id from a frame that failed to decode.
pub(crate) fn salvage_correlation(bytes: &[u8]) -> Option<(String, RequestId)> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    let kind = value.get("frame")?.as_str()?.to_string();
    let id = serde_json::from_value(value.get("id")?.clone()).ok()?;
    Some((kind, id))
}
