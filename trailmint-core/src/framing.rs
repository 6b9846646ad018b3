//! Native messaging framing
//!
//! Each message is a 32-bit length in native byte order followed by that
//! many bytes of UTF-8 JSON.

use std::io::{ErrorKind, Read, Write};

use serde::Serialize;

use crate::error::{Error, Result};

/// Largest message the host may send to the browser.
pub const MAX_OUTGOING_LEN: usize = 1024 * 1024;

/// Largest message the browser may send to the host.
pub const MAX_INCOMING_LEN: usize = 64 * 1024 * 1024;

/// Read one message body. Returns `None` on a clean EOF before the length.
///
/// EOF part way through the length prefix is an error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("truncated length prefix ({} of 4 bytes)", filled),
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_ne_bytes(len_buf) as usize;
    if len > MAX_INCOMING_LEN {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("incoming message of {} bytes exceeds limit", len),
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Serialize `message` and write it as one frame.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_OUTGOING_LEN {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("outgoing message of {} bytes exceeds limit", body.len()),
        )));
    }

    writer.write_all(&(body.len() as u32).to_ne_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_ne_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_reads_consecutive_frames_then_eof() {
        let mut bytes = frame(br#"{"type":"GET_STATS"}"#);
        bytes.extend(frame(br#"{"type":"DETECT_WALLETS"}"#));
        let mut cursor = Cursor::new(bytes);

        assert_eq!(
            read_frame(&mut cursor).unwrap().unwrap(),
            br#"{"type":"GET_STATS"}"#
        );
        assert_eq!(
            read_frame(&mut cursor).unwrap().unwrap(),
            br#"{"type":"DETECT_WALLETS"}"#
        );
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut bytes = frame(br#"{"type":"GET_STATS"}"#);
        bytes.truncate(10);
        assert!(read_frame(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_truncated_length_prefix_is_an_error() {
        let err = read_frame(&mut Cursor::new(vec![5u8, 0])).unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other}"),
        }

        // A complete frame followed by a stray byte
        let mut bytes = frame(br#"{"type":"GET_STATS"}"#);
        bytes.push(7);
        let mut cursor = Cursor::new(bytes);
        assert!(read_frame(&mut cursor).unwrap().is_some());
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_empty_input_is_a_clean_eof() {
        assert!(read_frame(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_write_message_prefixes_length() {
        let mut out = Vec::new();
        write_message(&mut out, &json!({"success": true})).unwrap();
        let len = u32::from_ne_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(len, out.len() - 4);
        assert_eq!(&out[4..], br#"{"success":true}"#);
    }

    #[test]
    fn test_oversized_outgoing_rejected() {
        let big = "x".repeat(MAX_OUTGOING_LEN);
        let mut out = Vec::new();
        assert!(write_message(&mut out, &big).is_err());
        assert!(out.is_empty());
    }
}
