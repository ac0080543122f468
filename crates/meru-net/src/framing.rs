// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Length-prefixed async framing over a raw byte stream.
//!
//! Two shapes are used across the six socket roles (spec.md §4.5): a
//! two-part `[topic][payload]` frame on the fan-in/fan-out channels, and a
//! one-part `[payload]` frame on the snapshot channel.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::NetError;

/// Frames larger than this are rejected rather than allocated.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Write a `[u32 be len][bytes]` frame.
pub async fn write_part<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), NetError> {
    let len = u32::try_from(bytes.len()).map_err(|_| NetError::FrameTooLarge(bytes.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Read a `[u32 be len][bytes]` frame.
pub async fn read_part<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, NetError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(NetError::FrameTooLarge(len as usize));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a two-part `[topic][payload]` frame.
pub async fn write_topic_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    topic: &[u8],
    payload: &[u8],
) -> Result<(), NetError> {
    write_part(writer, topic).await?;
    write_part(writer, payload).await
}

/// Build the bytes of a `[u32 be len][bytes]` frame in memory, for handing
/// to an [`crate::outbox::Outbox`] (which writes raw bytes as-is).
///
/// # Errors
/// Returns [`NetError::FrameTooLarge`] if `bytes` exceeds [`MAX_FRAME_LEN`].
pub fn encode_part(bytes: &[u8]) -> Result<Vec<u8>, NetError> {
    let len = u32::try_from(bytes.len()).map_err(|_| NetError::FrameTooLarge(bytes.len()))?;
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Build the bytes of a two-part `[topic][payload]` frame in memory.
///
/// # Errors
/// Returns [`NetError::FrameTooLarge`] if either part exceeds [`MAX_FRAME_LEN`].
pub fn encode_topic_frame(topic: &[u8], payload: &[u8]) -> Result<Vec<u8>, NetError> {
    let mut out = encode_part(topic)?;
    out.extend(encode_part(payload)?);
    Ok(out)
}

/// Read a two-part `[topic][payload]` frame.
pub async fn read_topic_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Vec<u8>, Vec<u8>), NetError> {
    let topic = read_part(reader).await?;
    let payload = read_part(reader).await?;
    Ok((topic, payload))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[tokio::test]
    async fn topic_frame_roundtrips() {
        let mut buf = Vec::new();
        write_topic_frame(&mut buf, b"state", b"hello").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let (topic, payload) = read_topic_frame(&mut cursor).await.unwrap();
        assert_eq!(topic, b"state");
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_part(&mut cursor).await.unwrap_err();
        assert!(matches!(err, NetError::FrameTooLarge(_)));
    }
}
