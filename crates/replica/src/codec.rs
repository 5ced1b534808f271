//! Encode/decode helpers for the replica wire protocol.
//!
//! All multi-byte integers are big-endian. Every message is framed as
//! `[length: u32 BE][payload: length bytes]`.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame size cap applied when no configured limit is supplied.
pub const MAX_DEFAULT_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Decode/framing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ended before a field was complete.
    #[error("truncated message: needed {expected} bytes, had {actual}")]
    Truncated {
        /// Bytes the field needed.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
    /// An enum tag byte had no defined meaning.
    #[error("bad {field} tag: {value}")]
    BadTag {
        /// Field being decoded.
        field: &'static str,
        /// Offending byte.
        value: u8,
    },
    /// A string field held invalid UTF-8.
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 {
        /// Field being decoded.
        field: &'static str,
    },
    /// A frame length exceeded the configured cap.
    #[error("frame of {size} bytes exceeds cap of {max}")]
    FrameTooLarge {
        /// Announced frame size.
        size: u32,
        /// Configured cap.
        max: u32,
    },
    /// Bytes remained after a complete message was decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Result alias for codec operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;

fn ensure(buf: &[u8], need: usize) -> FrameResult<()> {
    if buf.len() < need {
        return Err(FrameError::Truncated {
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Read one `u8`, advancing the slice.
pub fn read_u8(buf: &mut &[u8]) -> FrameResult<u8> {
    ensure(buf, 1)?;
    let v = buf[0];
    *buf = &buf[1..];
    Ok(v)
}

/// Read one big-endian `u16`, advancing the slice.
pub fn read_u16(buf: &mut &[u8]) -> FrameResult<u16> {
    ensure(buf, 2)?;
    let v = u16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(v)
}

/// Read one big-endian `u32`, advancing the slice.
pub fn read_u32(buf: &mut &[u8]) -> FrameResult<u32> {
    ensure(buf, 4)?;
    let v = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

/// Read a `u16`-length-prefixed UTF-8 string, advancing the slice.
pub fn read_string(buf: &mut &[u8], field: &'static str) -> FrameResult<String> {
    let len = read_u16(buf)? as usize;
    ensure(buf, len)?;
    let bytes = &buf[..len];
    *buf = &buf[len..];
    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8 { field })
}

/// Write a `u16`-length-prefixed UTF-8 string.
pub fn write_string(out: &mut BytesMut, s: &str) {
    out.put_u16(s.len() as u16);
    out.put_slice(s.as_bytes());
}

/// Fail decoding when `buf` still holds bytes.
pub fn expect_empty(buf: &[u8]) -> FrameResult<()> {
    if !buf.is_empty() {
        return Err(FrameError::TrailingBytes(buf.len()));
    }
    Ok(())
}

/// Write one framed message: big-endian `u32` length, then the payload.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let len = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Read one framed message, enforcing the `max` frame-size cap.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    max: u32,
) -> std::io::Result<FrameResult<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > max {
        return Ok(Err(FrameError::FrameTooLarge { size: len, max }));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(Ok(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut out = BytesMut::new();
        out.put_u8(7);
        out.put_u32(0xDEAD_BEEF);
        write_string(&mut out, "worker-1");
        let bytes = out.freeze();
        let mut buf: &[u8] = &bytes;
        assert_eq!(read_u8(&mut buf).unwrap(), 7);
        assert_eq!(read_u32(&mut buf).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_string(&mut buf, "worker").unwrap(), "worker-1");
        assert!(expect_empty(buf).is_ok());
    }

    #[test]
    fn truncation_is_detected() {
        let mut buf: &[u8] = &[0, 5, b'a'];
        assert_eq!(
            read_string(&mut buf, "s"),
            Err(FrameError::Truncated {
                expected: 5,
                actual: 1
            })
        );
    }

    #[test]
    fn invalid_utf8_is_detected() {
        let mut out = BytesMut::new();
        out.put_u16(2);
        out.put_slice(&[0xFF, 0xFE]);
        let bytes = out.freeze();
        let mut buf: &[u8] = &bytes;
        assert_eq!(
            read_string(&mut buf, "name"),
            Err(FrameError::InvalidUtf8 { field: "name" })
        );
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello frame").await.unwrap();
        let got = read_frame(&mut b, MAX_DEFAULT_FRAME_BYTES).await.unwrap().unwrap();
        assert_eq!(got, b"hello frame");
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &vec![0u8; 100]).await.unwrap();
        let err = read_frame(&mut b, 10).await.unwrap().unwrap_err();
        assert_eq!(err, FrameError::FrameTooLarge { size: 100, max: 10 });
    }
}
