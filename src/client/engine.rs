// src/client/engine.rs

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::error::{ProtocolError, Result};
use crate::common::frame::{
    copy_payload, read_length, read_text_frame, write_binary_frame, write_text_frame, DEFAULT_MAX_TEXT_FRAME,
};
use crate::common::protocol::{
    ChatCommand, ServerFrame, DOWNLOAD_PREFIX, DOWNLOAD_STARTING, FILE_RECEIVED, LIST_FILES, SYSTEM_SENDER,
    UPLOAD_PREFIX,
};
use crate::server::file_catalog::{parse_listing, FileCatalogEntry};

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub execution_time: f64,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub transfer: TransferResult,
    pub original_name: String,
}

struct ChatConnection {
    socket: TcpStream,
    display_name: String,
    reader: thread::JoinHandle<()>,
}

/// Client side of the relay protocol: one chat connection plus short-lived
/// connections for each file operation.
pub struct ClientProcessingEngine {
    server_addr: Mutex<Option<String>>,
    chat: Mutex<Option<ChatConnection>>,
    incoming: Mutex<Option<Receiver<ServerFrame>>>,
    is_connected: Arc<AtomicBool>,
}

impl ClientProcessingEngine {
    pub fn new() -> Self {
        ClientProcessingEngine {
            server_addr: Mutex::new(None),
            chat: Mutex::new(None),
            incoming: Mutex::new(None),
            is_connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Point file operations at a server without joining the chat.
    pub fn set_server(&self, server_ip: &str, server_port: &str) {
        *self.server_addr.lock() = Some(format!("{}:{}", server_ip, server_port));
    }

    /// Identify as `display_name` and start receiving chat frames.
    ///
    /// Returns the names already connected.
    pub fn connect(&self, server_ip: &str, server_port: &str, display_name: &str, location: &str) -> Result<Vec<String>> {
        if self.is_connected.load(Ordering::Relaxed) {
            return Err(ProtocolError::MalformedFrame("already connected".to_string()));
        }
        self.set_server(server_ip, server_port);
        let mut socket = self.open_connection()?;

        write_text_frame(&mut socket, display_name)?;
        write_text_frame(&mut socket, location)?;

        let greeting = ServerFrame::parse(&read_text_frame(&mut socket, DEFAULT_MAX_TEXT_FRAME)?);
        if let Some(name) = greeting.refused_name() {
            debug!(name, "identification refused");
            return Err(ProtocolError::NameTaken(name.to_string()));
        }

        let roster = match greeting {
            ServerFrame::Welcome(_) => {
                let _location = read_text_frame(&mut socket, DEFAULT_MAX_TEXT_FRAME)?;
                match ServerFrame::parse(&read_text_frame(&mut socket, DEFAULT_MAX_TEXT_FRAME)?) {
                    ServerFrame::Roster(names) => names,
                    other => {
                        return Err(ProtocolError::MalformedFrame(format!("expected roster, got '{}'", other)))
                    }
                }
            }
            ServerFrame::MessageFrom { sender, text, .. } if sender == SYSTEM_SENDER => {
                debug!(reply = %text, "identification refused");
                return Err(ProtocolError::MalformedFrame(text));
            }
            other => {
                return Err(ProtocolError::MalformedFrame(format!("unexpected greeting '{}'", other)));
            }
        };

        let (frames, incoming) = unbounded();
        let mut reader_socket = socket.try_clone()?;
        let is_connected = Arc::clone(&self.is_connected);
        let reader = thread::Builder::new()
            .name("chat-reader".to_string())
            .spawn(move || {
                loop {
                    match read_text_frame(&mut reader_socket, DEFAULT_MAX_TEXT_FRAME) {
                        Ok(frame) => {
                            if frames.send(ServerFrame::parse(&frame)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "chat connection ended");
                            break;
                        }
                    }
                }
                is_connected.store(false, Ordering::Relaxed);
            })?;

        *self.incoming.lock() = Some(incoming);
        *self.chat.lock() = Some(ChatConnection {
            socket,
            display_name: display_name.to_string(),
            reader,
        });
        self.is_connected.store(true, Ordering::Relaxed);
        Ok(roster)
    }

    pub fn is_server_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    pub fn display_name(&self) -> Option<String> {
        self.chat.lock().as_ref().map(|c| c.display_name.clone())
    }

    pub fn send_command(&self, command: &ChatCommand) -> Result<()> {
        let mut chat = self.chat.lock();
        let chat = chat
            .as_mut()
            .ok_or_else(|| ProtocolError::MalformedFrame("not connected to server".to_string()))?;
        write_text_frame(&mut chat.socket, &command.to_string())
    }

    pub fn say(&self, text: &str) -> Result<()> {
        self.send_command(&ChatCommand::Plain { text: text.to_string() })
    }

    pub fn send_to_all(&self, text: &str) -> Result<()> {
        self.send_command(&ChatCommand::Broadcast { text: text.to_string() })
    }

    pub fn send_to(&self, recipient: &str, text: &str) -> Result<()> {
        self.send_command(&ChatCommand::Directed {
            recipient: recipient.to_string(),
            text: text.to_string(),
        })
    }

    pub fn alert(&self, text: &str) -> Result<()> {
        self.send_command(&ChatCommand::Alert { text: text.to_string() })
    }

    pub fn request_roster(&self) -> Result<()> {
        self.send_command(&ChatCommand::RosterRequest)
    }

    /// Frames received on the chat connection, in arrival order.
    pub fn incoming(&self) -> Option<Receiver<ServerFrame>> {
        self.incoming.lock().clone()
    }

    /// Wait up to `timeout` for the next chat frame.
    pub fn next_frame(&self, timeout: Duration) -> Option<ServerFrame> {
        let incoming = self.incoming()?;
        match incoming.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Say goodbye and close the chat connection.
    pub fn disconnect(&self) -> Result<()> {
        if let Some(mut chat) = self.chat.lock().take() {
            let _ = write_text_frame(&mut chat.socket, &ChatCommand::Leave.to_string());
            let _ = chat.socket.shutdown(Shutdown::Write);
            if chat.reader.join().is_err() {
                warn!("chat reader thread panicked");
            }
            let _ = chat.socket.shutdown(Shutdown::Both);
        }
        self.is_connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Upload `path` for `recipient` on behalf of `sender`.
    pub fn upload_file(&self, path: &Path, recipient: &str, sender: &str) -> Result<UploadResult> {
        let start_time = Instant::now();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("{} has no file name", path.display())))?;

        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut socket = self.open_connection()?;
        write_text_frame(
            &mut socket,
            &format!("{}{}:{}:{}", UPLOAD_PREFIX, original_name, recipient, sender),
        )?;
        write_binary_frame(&mut socket, &mut file, len)?;

        let ack = read_text_frame(&mut socket, DEFAULT_MAX_TEXT_FRAME)?;
        if ack != FILE_RECEIVED {
            return Err(ProtocolError::MalformedFrame(format!("upload refused: {}", ack)));
        }

        Ok(UploadResult {
            transfer: TransferResult {
                execution_time: start_time.elapsed().as_secs_f64(),
                bytes_transferred: len,
            },
            original_name,
        })
    }

    /// Download `key` into `sink`. `None` means the server does not know the key.
    pub fn download_to<W: Write>(&self, key: &str, sink: &mut W) -> Result<Option<TransferResult>> {
        let start_time = Instant::now();
        let mut socket = self.open_connection()?;
        write_text_frame(&mut socket, &format!("{}{}", DOWNLOAD_PREFIX, key))?;

        let greeting = read_text_frame(&mut socket, DEFAULT_MAX_TEXT_FRAME)?;
        if greeting != DOWNLOAD_STARTING {
            return Err(ProtocolError::MalformedFrame(format!("unexpected download reply '{}'", greeting)));
        }

        let len = read_length(&mut socket)?;
        if len == 0 {
            return Ok(None);
        }

        copy_payload(&mut socket, sink, len)?;
        write_text_frame(&mut socket, FILE_RECEIVED)?;

        Ok(Some(TransferResult {
            execution_time: start_time.elapsed().as_secs_f64(),
            bytes_transferred: len,
        }))
    }

    /// Download `key` into `dest_dir`, naming the file after the key.
    pub fn download_file(&self, key: &str, dest_dir: &Path) -> Result<Option<(PathBuf, TransferResult)>> {
        let path = dest_dir.join(key);
        let mut writer = BufWriter::new(File::create(&path)?);

        match self.download_to(key, &mut writer) {
            Ok(Some(result)) => {
                writer.flush()?;
                Ok(Some((path, result)))
            }
            outcome => {
                drop(writer);
                let _ = fs::remove_file(&path);
                outcome.map(|_| None)
            }
        }
    }

    pub fn list_files(&self) -> Result<Vec<FileCatalogEntry>> {
        let mut socket = self.open_connection()?;
        write_text_frame(&mut socket, LIST_FILES)?;
        let listing = read_text_frame(&mut socket, DEFAULT_MAX_TEXT_FRAME)?;
        Ok(parse_listing(&listing))
    }

    fn open_connection(&self) -> Result<TcpStream> {
        let addr = self
            .server_addr
            .lock()
            .clone()
            .ok_or_else(|| ProtocolError::MalformedFrame("no server configured".to_string()))?;
        let stream = TcpStream::connect(&addr)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Default for ClientProcessingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClientProcessingEngine {
    fn drop(&mut self) {
        if let Some(chat) = self.chat.get_mut().as_ref() {
            let _ = chat.socket.shutdown(Shutdown::Both);
        }
    }
}
