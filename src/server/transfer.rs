// src/server/transfer.rs

//! One-shot file sessions: upload, download and catalog listing.

use std::io::{Read, Write};

use tracing::{debug, info, warn};

use crate::common::error::{ProtocolError, Result};
use crate::common::frame::{copy_payload, read_length, read_text_frame, write_binary_frame, write_length, write_text_frame};
use crate::common::protocol::{UploadRequest, DOWNLOAD_STARTING, FILE_RECEIVED};
use crate::server::engine::ServerContext;
use crate::server::file_catalog::FileCatalogEntry;

/// Receive an upload whose metadata frame has already been read.
///
/// The payload is streamed to storage, catalogued, acknowledged with
/// `ARQUIVO_RECEBIDO` and announced to the recipient. Any failure before the
/// catalog insert leaves no trace; after it, the upload counts as done.
pub fn handle_upload<S: Read + Write>(
    ctx: &ServerContext,
    stream: &mut S,
    request: UploadRequest,
) -> Result<FileCatalogEntry> {
    let len = read_length(stream)?;
    debug!(name = %request.original_name, len, "upload started");

    let key = ctx.catalog.generate_key(&request.original_name);
    if ctx.catalog.contains(&key) {
        return Err(ProtocolError::KeyCollision(key));
    }

    let mut pending = ctx.storage.create(&key)?;
    copy_payload(stream, pending.writer(), len)?;
    pending.commit()?;

    let entry = FileCatalogEntry {
        unique_key: key,
        original_name: request.original_name,
        uploader: request.sender,
        size: len,
    };
    // Catalogue first so an acknowledged upload is always listable.
    ctx.catalog.insert(entry.clone())?;
    info!(key = %entry.unique_key, uploader = %entry.uploader, size = len, "file catalogued");

    // The file is stored either way, so a lost ack still gets announced.
    if let Err(e) = write_text_frame(stream, FILE_RECEIVED) {
        warn!(key = %entry.unique_key, error = %e, "could not acknowledge upload");
    }

    match ctx.router.notify_upload(&request.recipient, &entry) {
        Ok(notified) => debug!(key = %entry.unique_key, notified, "upload announced"),
        Err(e) => warn!(key = %entry.unique_key, error = %e, "upload notice dropped"),
    }

    Ok(entry)
}

/// Stream a catalogued file back. Returns the number of payload bytes sent;
/// an unknown key is answered with a zero length and yields `None`.
pub fn handle_download<S: Read + Write>(ctx: &ServerContext, stream: &mut S, key: &str) -> Result<Option<u64>> {
    write_text_frame(stream, DOWNLOAD_STARTING)?;

    let stored = if ctx.catalog.contains(key) {
        let stored = ctx.storage.open(key)?;
        if stored.is_none() {
            warn!(key, "catalogued file is missing from storage");
        }
        stored
    } else {
        None
    };

    let Some((mut file, len)) = stored else {
        debug!(key, "download of unknown key");
        write_length(stream, 0)?;
        return Ok(None);
    };

    write_binary_frame(stream, &mut file, len)?;
    info!(key, size = len, "file sent");

    if len > 0 {
        match read_text_frame(stream, ctx.config.max_text_frame) {
            Ok(ack) if ack == FILE_RECEIVED => debug!(key, "download acknowledged"),
            Ok(other) => warn!(key, reply = %other, "unexpected download acknowledgement"),
            Err(e) => warn!(key, error = %e, "download was not acknowledged"),
        }
    }

    Ok(Some(len))
}

/// Send the whole catalog as one text frame.
pub fn handle_list<W: Write>(ctx: &ServerContext, stream: &mut W) -> Result<usize> {
    let listing = ctx.catalog.serialize();
    write_text_frame(stream, &listing)?;
    Ok(ctx.catalog.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::DEFAULT_MAX_TEXT_FRAME;
    use crate::common::protocol::ALL_INSPECTORS;
    use crate::server::config::ServerConfig;
    use crate::server::registry::Participant;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// An in-memory connection: reads come from `input`, writes land in `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: Vec<u8>) -> Self {
            Duplex {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        fn replies(&self) -> Cursor<Vec<u8>> {
            Cursor::new(self.output.clone())
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn context(dir: &TempDir) -> ServerContext {
        ServerContext::new(ServerConfig::local(dir.path())).unwrap()
    }

    fn upload_request(name: &str) -> UploadRequest {
        UploadRequest {
            original_name: name.to_string(),
            recipient: ALL_INSPECTORS.to_string(),
            sender: "A".to_string(),
        }
    }

    fn upload_bytes(payload: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        write_length(&mut wire, payload.len() as u64).unwrap();
        wire.extend_from_slice(payload);
        wire
    }

    #[test]
    fn test_upload_then_download_round_trip() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let mut upload = Duplex::new(upload_bytes(b"hello world!"));
        let entry = handle_upload(&ctx, &mut upload, upload_request("report.txt")).unwrap();
        assert_eq!(
            read_text_frame(&mut upload.replies(), DEFAULT_MAX_TEXT_FRAME).unwrap(),
            FILE_RECEIVED
        );
        assert_eq!(ctx.catalog.get(&entry.unique_key).unwrap(), entry);
        assert_eq!(entry.original_name, "report.txt");
        assert_eq!(entry.uploader, "A");

        let mut ack = Vec::new();
        write_text_frame(&mut ack, FILE_RECEIVED).unwrap();
        let mut download = Duplex::new(ack);
        assert_eq!(handle_download(&ctx, &mut download, &entry.unique_key).unwrap(), Some(12));

        let mut replies = download.replies();
        assert_eq!(
            read_text_frame(&mut replies, DEFAULT_MAX_TEXT_FRAME).unwrap(),
            DOWNLOAD_STARTING
        );
        let len = read_length(&mut replies).unwrap();
        let mut content = Vec::new();
        copy_payload(&mut replies, &mut content, len).unwrap();
        assert_eq!(content, b"hello world!");
    }

    #[test]
    fn test_truncated_upload_is_not_catalogued() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let mut wire = Vec::new();
        write_length(&mut wire, 100).unwrap();
        wire.extend_from_slice(b"too short");
        let mut upload = Duplex::new(wire);

        let err = handle_upload(&ctx, &mut upload, upload_request("big.bin")).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedTransfer { expected: 100, received: 9 }));
        assert!(ctx.catalog.is_empty());
        assert!(upload.output.is_empty(), "no acknowledgement after a failed upload");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Delivers `input` but refuses every write, like a socket whose peer
    /// hung up right after sending.
    struct HungUp {
        input: Cursor<Vec<u8>>,
    }

    impl Read for HungUp {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for HungUp {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"))
        }
    }

    #[test]
    fn test_failed_ack_still_announces_upload() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let (tx, bruno_rx) = crossbeam::channel::unbounded();
        let bruno = std::sync::Arc::new(Participant::new(7, "Bruno", "Ponte", tx));
        ctx.router.join(bruno).unwrap();
        bruno_rx.try_iter().for_each(drop);

        let mut upload = HungUp {
            input: Cursor::new(upload_bytes(b"abc")),
        };
        let request = UploadRequest {
            original_name: "a.txt".to_string(),
            recipient: "Bruno".to_string(),
            sender: "A".to_string(),
        };
        let entry = handle_upload(&ctx, &mut upload, request).unwrap();

        assert_eq!(ctx.catalog.len(), 1);
        assert_eq!(
            bruno_rx.try_iter().collect::<Vec<_>>(),
            vec![format!("ARQUIVO:{}:A:a.txt", entry.unique_key)]
        );
    }

    #[test]
    fn test_download_of_unknown_key_sends_zero_length() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let mut download = Duplex::new(Vec::new());
        assert_eq!(handle_download(&ctx, &mut download, "never-uploaded").unwrap(), None);

        let mut replies = download.replies();
        assert_eq!(
            read_text_frame(&mut replies, DEFAULT_MAX_TEXT_FRAME).unwrap(),
            DOWNLOAD_STARTING
        );
        assert_eq!(read_length(&mut replies).unwrap(), 0);
        assert_eq!(replies.position() as usize, replies.get_ref().len());
    }

    #[test]
    fn test_missing_ack_does_not_fail_download() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let mut upload = Duplex::new(upload_bytes(b"abc"));
        let entry = handle_upload(&ctx, &mut upload, upload_request("a.txt")).unwrap();

        let mut download = Duplex::new(Vec::new());
        assert_eq!(handle_download(&ctx, &mut download, &entry.unique_key).unwrap(), Some(3));
    }

    #[test]
    fn test_listing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        let mut empty = Vec::new();
        assert_eq!(handle_list(&ctx, &mut empty).unwrap(), 0);
        assert_eq!(read_text_frame(&mut Cursor::new(empty), 64).unwrap(), "");

        let mut upload = Duplex::new(upload_bytes(b"hello world!"));
        let entry = handle_upload(&ctx, &mut upload, upload_request("report.txt")).unwrap();

        let mut listing = Vec::new();
        assert_eq!(handle_list(&ctx, &mut listing).unwrap(), 1);
        assert_eq!(
            read_text_frame(&mut Cursor::new(listing), DEFAULT_MAX_TEXT_FRAME).unwrap(),
            format!("{}|report.txt|A", entry.unique_key)
        );
    }
}
