//! Value transport: binary encode/decode over an async byte stream.
//!
//! Every function here performs exactly the reads or writes for one value
//! and nothing else, so callers compose them in the opcode-specific order
//! the exchange requires. Integers are little-endian and fixed-width.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::command::{Command, Transport, COMMAND_RECORD_LEN};
use crate::status::ErrorCode;
use crate::MAX_STR_LEN;

/// Errors produced while encoding or decoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u32),

    #[error("Unknown blob transport selector: {0}")]
    UnknownTransport(u8),

    /// Outgoing string outside `[1, MAX_STR_LEN]`. Raised before any I/O.
    #[error("String length {len} outside 1..={max}", max = MAX_STR_LEN)]
    InvalidStringLength { len: usize },

    /// Incoming string longer than `MAX_STR_LEN`.
    #[error("Peer sent a string of {len} bytes (max {max})", max = MAX_STR_LEN)]
    StringTooLong { len: usize },

    #[error("Peer sent a string that is not valid UTF-8")]
    InvalidUtf8,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Status this failure is reported as.
    ///
    /// Only a local precondition violation is a parameter error; every
    /// decoding failure means the stream can no longer be trusted.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidStringLength { .. } => ErrorCode::InvalidParameter,
            Self::Io(err) => ErrorCode::from_io(err),
            _ => ErrorCode::IoError,
        }
    }
}

/// Checks the outgoing-string precondition without touching the stream.
pub fn validate_str(value: &str) -> Result<(), ProtocolError> {
    let len = value.len();
    if len == 0 || len > MAX_STR_LEN {
        return Err(ProtocolError::InvalidStringLength { len });
    }
    Ok(())
}

// ============================================================================
// Integers and status
// ============================================================================

pub async fn write_u32<W: AsyncWrite + Unpin>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes()).await
}

pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<u32> {
    r.read_u32_le().await
}

pub async fn write_i32<W: AsyncWrite + Unpin>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes()).await
}

pub async fn read_i32<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<i32> {
    r.read_i32_le().await
}

pub async fn write_i64<W: AsyncWrite + Unpin>(w: &mut W, value: i64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes()).await
}

pub async fn read_i64<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<i64> {
    r.read_i64_le().await
}

pub async fn write_status<W: AsyncWrite + Unpin>(w: &mut W, status: ErrorCode) -> io::Result<()> {
    write_u32(w, status.as_u32()).await
}

pub async fn read_status<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<ErrorCode> {
    Ok(ErrorCode::from_u32(read_u32(r).await?))
}

// ============================================================================
// Command records
// ============================================================================

pub async fn write_command<W: AsyncWrite + Unpin>(w: &mut W, cmd: &Command) -> io::Result<()> {
    w.write_all(&cmd.encode()).await
}

pub async fn read_command<R: AsyncRead + Unpin>(r: &mut R) -> Result<Command, ProtocolError> {
    let mut buf = [0u8; COMMAND_RECORD_LEN];
    r.read_exact(&mut buf).await?;
    Command::decode(&buf)
}

// ============================================================================
// Strings
// ============================================================================

/// Writes a length-prefixed string after validating it.
pub async fn write_str<W: AsyncWrite + Unpin>(w: &mut W, value: &str) -> Result<(), ProtocolError> {
    validate_str(value)?;
    // validate_str bounds the length to MAX_STR_LEN
    write_u32(w, value.len() as u32).await?;
    w.write_all(value.as_bytes()).await?;
    Ok(())
}

pub async fn read_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, ProtocolError> {
    let len = read_u32(r).await? as usize;
    if len > MAX_STR_LEN {
        return Err(ProtocolError::StringTooLong { len });
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Writes a probe-prefixed optional string.
///
/// `Some` is sent as `NONE` followed by the string, `None` as a lone
/// `NO_DATA` probe.
pub async fn write_opt_str<W: AsyncWrite + Unpin>(
    w: &mut W,
    value: Option<&str>,
) -> Result<(), ProtocolError> {
    match value {
        Some(s) => {
            validate_str(s)?;
            write_status(w, ErrorCode::None).await?;
            write_str(w, s).await
        }
        None => {
            write_status(w, ErrorCode::NoData).await?;
            Ok(())
        }
    }
}

/// Reads a probe-prefixed optional string. Any probe other than `NONE`
/// means the field is absent and no bytes follow.
pub async fn read_opt_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<String>, ProtocolError> {
    if read_status(r).await?.is_ok() {
        Ok(Some(read_str(r).await?))
    } else {
        Ok(None)
    }
}

/// Writes a probe-prefixed optional integer.
pub async fn write_opt_i32<W: AsyncWrite + Unpin>(w: &mut W, value: Option<i32>) -> io::Result<()> {
    match value {
        Some(v) => {
            write_status(w, ErrorCode::None).await?;
            write_i32(w, v).await
        }
        None => write_status(w, ErrorCode::NoData).await,
    }
}

pub async fn read_opt_i32<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Option<i32>> {
    if read_status(r).await?.is_ok() {
        Ok(Some(read_i32(r).await?))
    } else {
        Ok(None)
    }
}

// ============================================================================
// Blob framing
// ============================================================================

pub async fn write_transport<W: AsyncWrite + Unpin>(w: &mut W, transport: Transport) -> io::Result<()> {
    w.write_all(&[transport.as_u8()]).await
}

pub async fn read_transport<R: AsyncRead + Unpin>(r: &mut R) -> Result<Transport, ProtocolError> {
    Transport::try_from(r.read_u8().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[tokio::test]
    async fn test_string_wire_format() {
        let mut buf = Vec::new();
        write_str(&mut buf, "abc").await.unwrap();
        assert_eq!(buf, vec![3, 0, 0, 0, b'a', b'b', b'c']);

        let mut reader = buf.as_slice();
        assert_eq!(read_str(&mut reader).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_invalid_outgoing_strings_write_nothing() {
        let mut buf = Vec::new();
        let empty = write_str(&mut buf, "").await;
        assert!(matches!(
            empty,
            Err(ProtocolError::InvalidStringLength { len: 0 })
        ));

        let long = "x".repeat(MAX_STR_LEN + 1);
        let result = write_opt_str(&mut buf, Some(&long)).await;
        assert!(matches!(result, Err(ProtocolError::InvalidStringLength { .. })));
        assert_eq!(result.unwrap_err().code(), ErrorCode::InvalidParameter);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_max_len_string_accepted() {
        let max = "y".repeat(MAX_STR_LEN);
        let mut buf = Vec::new();
        write_str(&mut buf, &max).await.unwrap();
        assert_eq!(buf.len(), 4 + MAX_STR_LEN);
    }

    #[tokio::test]
    async fn test_oversized_incoming_string_rejected() {
        let mut buf = Vec::new();
        write_u32(&mut buf, (MAX_STR_LEN + 1) as u32).await.unwrap();
        let mut reader = buf.as_slice();
        let err = read_str(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::StringTooLong { .. }));
        assert_eq!(err.code(), ErrorCode::IoError);
    }

    #[tokio::test]
    async fn test_absent_string_sends_probe_only() {
        let mut buf = Vec::new();
        write_opt_str(&mut buf, None).await.unwrap();
        assert_eq!(buf, ErrorCode::NoData.as_u32().to_le_bytes().to_vec());

        let mut reader = buf.as_slice();
        assert_eq!(read_opt_str(&mut reader).await.unwrap(), None);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_optional_int_probe() {
        let mut buf = Vec::new();
        write_opt_i32(&mut buf, Some(-5)).await.unwrap();
        write_opt_i32(&mut buf, None).await.unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(read_opt_i32(&mut reader).await.unwrap(), Some(-5));
        assert_eq!(read_opt_i32(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_command_is_io_error() {
        let cmd = Command::new(Opcode::CommonNoti, -1, 9);
        let encoded = cmd.encode();
        let mut reader = &encoded[..10];
        let err = read_command(&mut reader).await.unwrap_err();
        match err {
            ProtocolError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_rejected() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 2).await.unwrap();
        buf.extend_from_slice(&[0xff, 0xfe]);
        let mut reader = buf.as_slice();
        assert!(matches!(
            read_str(&mut reader).await,
            Err(ProtocolError::InvalidUtf8)
        ));
    }
}
