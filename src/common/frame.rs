//! # Frame Codec
//!
//! Length-prefixed framing for the client-facing byte stream.
//!
//! ## Wire Protocol
//!
//! ```text
//! [4 bytes: payload length, big-endian u32] [N bytes: payload]
//! ```
//!
//! A length of zero is the batch terminator, never an image. The dispatcher's single
//! answer is a bare big-endian u32 with no prefix: `0` means no match, `k` means the
//! candidate at zero-based index `k - 1` matched.
//!
//! All functions are generic over tokio's async I/O traits so sessions can run on a
//! `TcpStream` in production and on an in-memory duplex pipe in tests.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::IngestError;

/// Default upper bound for a single frame (100MB), same cap as the RPC connection.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Size of the length prefix and of the answer frame.
pub const PREFIX_LEN: usize = 4;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A non-empty payload.
    Image(Vec<u8>),
    /// The zero-length terminator.
    EndOfBatch,
}

/// Read one frame, waiting until the full declared length has arrived.
///
/// # Returns
/// - `Ok(Frame::Image(bytes))`: a complete payload
/// - `Ok(Frame::EndOfBatch)`: a zero length prefix
/// - `Err(IngestError::ConnectionClosed)`: the stream ended cleanly before a new frame
/// - `Err(IngestError::Truncated { .. })`: the stream ended inside a prefix or payload
/// - `Err(IngestError::FrameTooLarge { .. })`: the declared length exceeds `max_len`
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Frame, IngestError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    let got = read_full(reader, &mut prefix).await?;
    if got == 0 {
        return Err(IngestError::ConnectionClosed);
    }
    if got < PREFIX_LEN {
        return Err(IngestError::Truncated {
            expected: PREFIX_LEN,
            received: got,
        });
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length == 0 {
        return Ok(Frame::EndOfBatch);
    }
    if length > max_len {
        return Err(IngestError::FrameTooLarge {
            length,
            max: max_len,
        });
    }

    let mut payload = vec![0u8; length];
    let got = read_full(reader, &mut payload).await?;
    if got < length {
        return Err(IngestError::Truncated {
            expected: length,
            received: got,
        });
    }

    Ok(Frame::Image(payload))
}

/// Keep reading until `buf` is full or the stream ends. Returns the number of bytes read.
///
/// `read_exact` cannot report how much arrived before EOF, which the truncation
/// error needs.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Big-endian length prefix for a payload of `len` bytes.
fn length_prefix(len: usize) -> io::Result<[u8; PREFIX_LEN]> {
    let len = u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes does not fit a frame", len),
        )
    })?;
    Ok(len.to_be_bytes())
}

/// Encode a payload into its on-wire form. An empty payload encodes as the terminator.
pub fn encode_frame(payload: &[u8]) -> io::Result<Vec<u8>> {
    let prefix = length_prefix(payload.len())?;
    let mut out = Vec::with_capacity(PREFIX_LEN + payload.len());
    out.extend_from_slice(&prefix);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&length_prefix(payload.len())?).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Write the zero-length batch terminator and flush.
pub async fn write_terminator<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&0u32.to_be_bytes()).await?;
    writer.flush().await
}

/// Write the dispatcher's answer: a bare 4-byte big-endian value, then flush.
pub async fn write_answer<W>(writer: &mut W, value: u32) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.to_be_bytes()).await?;
    writer.flush().await
}

/// Read the dispatcher's 4-byte answer.
pub async fn read_answer<R>(reader: &mut R) -> io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; PREFIX_LEN];
    reader.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}
