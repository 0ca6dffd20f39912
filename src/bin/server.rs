// src/bin/server.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use inspector_relay::server::{
    app_interface::ServerAppInterface,
    config::{ServerConfig, DEFAULT_PORT},
    engine::ServerProcessingEngine,
};

/// Chat and file relay server for field inspectors.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on (0 picks a free one).
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory that holds uploaded files while the server runs.
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Read/write timeout for transfers, in seconds (0 disables it).
    #[arg(long, default_value_t = 60)]
    io_timeout_secs: u64,

    /// Largest accepted text frame, in bytes.
    #[arg(long)]
    max_frame_bytes: Option<usize>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            host: self.host,
            port: self.port,
            storage_dir: self.storage_dir.unwrap_or(defaults.storage_dir),
            io_timeout: (self.io_timeout_secs > 0).then(|| Duration::from_secs(self.io_timeout_secs)),
            max_text_frame: self.max_frame_bytes.unwrap_or(defaults.max_text_frame),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "inspector_relay=info".into()),
        )
        .init();

    let config = Args::parse().into_config();

    let engine = Arc::new(ServerProcessingEngine::new(config).map_err(|e| e.to_string())?);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let interface = ServerAppInterface::new(Arc::clone(&engine), shutdown_tx);

    let addr = engine.initialize().map_err(|e| e.to_string())?;
    println!("Inspector relay server listening on {}", addr);
    println!("Type 'list' to see connected inspectors or 'quit' to shutdown.");

    // Run interface in separate task
    let interface_handle = tokio::spawn(async move { interface.read_commands().await });

    // Wait for shutdown signal
    shutdown_rx.recv().await;

    if let Err(e) = interface_handle.await {
        eprintln!("Interface error: {}", e);
    }

    Ok(())
}
