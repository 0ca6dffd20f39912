// src/server/config.rs

use std::path::PathBuf;
use std::time::Duration;

use crate::common::frame::DEFAULT_MAX_TEXT_FRAME;

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// `0` asks the OS for a free port.
    pub port: u16,
    /// Where uploaded payloads are kept while the process runs.
    pub storage_dir: PathBuf,
    /// Applied to writes, to the first frame, and to every read of a
    /// transfer session. Chat sessions read without a timeout.
    pub io_timeout: Option<Duration>,
    pub max_text_frame: usize,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loopback on an ephemeral port, storing payloads under `storage_dir`.
    pub fn local(storage_dir: impl Into<PathBuf>) -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            storage_dir: storage_dir.into(),
            ..ServerConfig::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            storage_dir: std::env::temp_dir().join("inspector-relay"),
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
            max_text_frame: DEFAULT_MAX_TEXT_FRAME,
        }
    }
}
