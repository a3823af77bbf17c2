//! Length-prefixed bincode frames over an ordered byte stream
//!
//! Each frame is a big-endian `u32` body length followed by the bincode
//! encoding of one [`Packet`]. A body that fails to decode leaves the stream
//! aligned on the next frame, so callers can drop that single message and
//! keep reading. A bad length prefix cannot be recovered from.

use crate::Packet;
use bincode::{deserialize, serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single frame body
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer closed the stream between frames
    #[error("connection closed by peer")]
    Closed,

    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),

    /// The frame arrived intact but its body is not a valid packet
    #[error("malformed packet: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the stream is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Malformed(_))
    }
}

/// Encodes a packet into a complete frame, prefix included
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, FrameError> {
    let body = serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(packet)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next packet from `reader`
///
/// Not cancel safe: abandoning the future mid-frame desynchronises the stream.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    Ok(deserialize::<Packet>(&body)?)
}
