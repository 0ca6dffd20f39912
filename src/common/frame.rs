// src/common/frame.rs

//! Wire framing shared by the server and the client.
//!
//! Text frames are a `u32` big-endian byte count followed by UTF-8 bytes.
//! Binary payloads are an `i64` big-endian byte count followed by exactly
//! that many raw bytes, moved in [`CHUNK_SIZE`] pieces.

use std::io::{self, ErrorKind, Read, Write};

use crate::common::error::{ProtocolError, Result};

/// Size of the buffer used to stream file payloads.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Largest text frame accepted unless configured otherwise.
pub const DEFAULT_MAX_TEXT_FRAME: usize = 1024 * 1024;

/// Write one text frame and flush it.
///
/// The prefix and body go out in a single `write_all` so that a frame is
/// never split across two writes on the same socket.
pub fn write_text_frame<W: Write>(writer: &mut W, text: &str) -> Result<()> {
    let len = u32::try_from(text.len()).map_err(|_| {
        ProtocolError::MalformedFrame(format!("text frame of {} bytes is too long", text.len()))
    })?;

    let mut buffer = Vec::with_capacity(4 + text.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(text.as_bytes());

    writer.write_all(&buffer)?;
    writer.flush()?;
    Ok(())
}

/// Read one text frame, blocking until it is complete.
pub fn read_text_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<String> {
    let mut prefix = [0u8; 4];
    read_exact_or_closed(reader, &mut prefix)?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_len {
        return Err(ProtocolError::MalformedFrame(format!(
            "text frame of {} bytes exceeds limit of {}",
            len, max_len
        )));
    }

    let mut body = vec![0u8; len];
    read_exact_or_closed(reader, &mut body)?;

    String::from_utf8(body)
        .map_err(|e| ProtocolError::MalformedFrame(format!("invalid UTF-8 in text frame: {}", e)))
}

/// Write the 64-bit length that opens a binary frame.
pub fn write_length<W: Write>(writer: &mut W, len: u64) -> Result<()> {
    let len = i64::try_from(len)
        .map_err(|_| ProtocolError::MalformedFrame(format!("payload length {} overflows", len)))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read the 64-bit length that opens a binary frame.
pub fn read_length<R: Read>(reader: &mut R) -> Result<u64> {
    let mut prefix = [0u8; 8];
    read_exact_or_closed(reader, &mut prefix)?;

    let len = i64::from_be_bytes(prefix);
    u64::try_from(len)
        .map_err(|_| ProtocolError::MalformedFrame(format!("negative payload length {}", len)))
}

/// Move exactly `len` bytes from `source` to `sink` in fixed-size chunks.
///
/// Running out of input before `len` bytes is a [`ProtocolError::TruncatedTransfer`];
/// the caller abandons the whole transfer.
pub fn copy_payload<R: Read, W: Write>(source: &mut R, sink: &mut W, len: u64) -> Result<u64> {
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    while copied < len {
        let want = std::cmp::min(CHUNK_SIZE as u64, len - copied) as usize;
        let n = match source.read(&mut buffer[..want]) {
            Ok(0) => {
                return Err(ProtocolError::TruncatedTransfer {
                    expected: len,
                    received: copied,
                })
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::TruncatedTransfer {
                    expected: len,
                    received: copied,
                })
            }
            Err(e) => return Err(e.into()),
        };

        sink.write_all(&buffer[..n])?;
        copied += n as u64;
    }

    sink.flush()?;
    Ok(copied)
}

/// Write a whole binary frame: the length, then the payload read from `source`.
pub fn write_binary_frame<R: Read, W: Write>(writer: &mut W, source: &mut R, len: u64) -> Result<()> {
    write_length(writer, len)?;
    copy_payload(source, writer, len)?;
    Ok(())
}

fn read_exact_or_closed<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_text_frame_carries_newlines() {
        let mut wire = Vec::new();
        write_text_frame(&mut wire, "line one\nline two").unwrap();
        assert_eq!(&wire[..4], &17u32.to_be_bytes());

        let mut reader = Cursor::new(wire);
        let text = read_text_frame(&mut reader, DEFAULT_MAX_TEXT_FRAME).unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn test_frames_are_read_one_at_a_time() {
        let mut wire = Vec::new();
        write_text_frame(&mut wire, "Ana").unwrap();
        write_text_frame(&mut wire, "").unwrap();
        write_text_frame(&mut wire, "Ponte").unwrap();

        let mut reader = Cursor::new(wire);
        assert_eq!(read_text_frame(&mut reader, 64).unwrap(), "Ana");
        assert_eq!(read_text_frame(&mut reader, 64).unwrap(), "");
        assert_eq!(read_text_frame(&mut reader, 64).unwrap(), "Ponte");
        assert!(matches!(
            read_text_frame(&mut reader, 64),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_oversized_text_frame_is_malformed() {
        let mut wire = Vec::new();
        write_text_frame(&mut wire, "0123456789").unwrap();

        let mut reader = Cursor::new(wire);
        assert!(matches!(
            read_text_frame(&mut reader, 4),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut wire = 2u32.to_be_bytes().to_vec();
        wire.extend_from_slice(&[0xff, 0xfe]);

        let mut reader = Cursor::new(wire);
        assert!(matches!(
            read_text_frame(&mut reader, 64),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_partial_text_frame_is_closed_connection() {
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");

        let mut reader = Cursor::new(wire);
        assert!(matches!(
            read_text_frame(&mut reader, 64),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_binary_frame_spanning_several_chunks() {
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 2 + 123)).map(|i| (i % 251) as u8).collect();
        let mut wire = Vec::new();
        write_binary_frame(&mut wire, &mut Cursor::new(&payload), payload.len() as u64).unwrap();

        let mut reader = Cursor::new(wire);
        let len = read_length(&mut reader).unwrap();
        assert_eq!(len, payload.len() as u64);

        let mut received = Vec::new();
        let copied = copy_payload(&mut reader, &mut received, len).unwrap();
        assert_eq!(copied, len);
        assert_eq!(received, payload);
    }

    #[test]
    fn test_short_payload_is_truncated_transfer() {
        let mut wire = Vec::new();
        write_length(&mut wire, 12).unwrap();
        wire.extend_from_slice(b"only five");

        let mut reader = Cursor::new(wire);
        let len = read_length(&mut reader).unwrap();
        let mut sink = Vec::new();
        match copy_payload(&mut reader, &mut sink, len) {
            Err(ProtocolError::TruncatedTransfer { expected, received }) => {
                assert_eq!(expected, 12);
                assert_eq!(received, 9);
            }
            other => panic!("expected truncated transfer, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_length_is_malformed() {
        let wire = (-1i64).to_be_bytes().to_vec();
        let mut reader = Cursor::new(wire);
        assert!(matches!(
            read_length(&mut reader),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }
}
