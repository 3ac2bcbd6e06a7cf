use crate::Message;
use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on a single inbound frame. Outbound `kvs` frames are packed to a
/// much smaller, configurable soft cap; this bound only protects the decoder
/// from a corrupt or hostile length prefix.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The peer closed the stream cleanly at a frame boundary.
    #[error("connection closed")]
    Eof,

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    /// Malformed framing or an unrecognized payload kind.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Writes one self-delimiting frame: a big-endian `u32` length followed by
/// the encoded message.
///
/// The frame is assembled in memory and written with a single `write_all`,
/// so a peer never observes a partial frame from a task switch; only a
/// failed write can truncate it, and that tears down the session.
pub async fn write_message<W>(io: &mut W, msg: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let payload =
        bincode::serialize(msg).map_err(|e| WireError::Protocol(format!("encode: {}", e)))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::Protocol(format!(
            "frame length {} exceeds maximum {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    io.write_all(&frame).await?;
    io.flush().await?;
    Ok(())
}

/// Reads one frame and decodes its payload.
///
/// A stream that ends before the length prefix completes is a clean close;
/// one that ends mid-frame is a protocol error.
pub async fn read_message<R>(io: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match io.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(WireError::Eof),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::Protocol(format!(
            "frame length {} exceeds maximum {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    match io.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(WireError::Protocol("truncated frame".to_string()))
        }
        Err(e) => return Err(e.into()),
    }

    bincode::deserialize(&payload).map_err(|e| WireError::Protocol(format!("decode: {}", e)))
}
