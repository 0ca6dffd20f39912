// src/server/engine.rs

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::common::error::{ProtocolError, Result};
use crate::common::frame::{read_text_frame, write_text_frame};
use crate::common::protocol::{ServerFrame, SessionRequest};
use crate::server::config::ServerConfig;
use crate::server::file_catalog::FileCatalog;
use crate::server::registry::ClientRegistry;
use crate::server::router::MessageRouter;
use crate::server::storage::FileStorage;
use crate::server::{session, transfer};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// State shared by every connection thread.
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: Arc<ClientRegistry>,
    pub catalog: Arc<FileCatalog>,
    pub storage: FileStorage,
    pub router: MessageRouter,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let storage = FileStorage::new(config.storage_dir.clone())?;
        let registry = Arc::new(ClientRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry));

        Ok(ServerContext {
            config,
            registry,
            catalog: Arc::new(FileCatalog::new()),
            storage,
            router,
        })
    }
}

pub struct ServerProcessingEngine {
    context: Arc<ServerContext>,
    next_connection_id: Arc<AtomicU64>,
    should_stop: Arc<AtomicBool>,
    local_addr: Mutex<Option<SocketAddr>>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ServerProcessingEngine {
    pub fn new(config: ServerConfig) -> Result<Self> {
        Ok(ServerProcessingEngine {
            context: Arc::new(ServerContext::new(config)?),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            should_stop: Arc::new(AtomicBool::new(false)),
            local_addr: Mutex::new(None),
            dispatcher: Mutex::new(None),
        })
    }

    /// Bind the listening socket and start accepting connections on a
    /// dedicated thread. Returns the bound address.
    pub fn initialize(&self) -> Result<SocketAddr> {
        let bind_address = self.context.config.bind_address();
        let listener = TcpListener::bind(&bind_address)?;
        // Non-blocking so the accept loop can notice a shutdown request.
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        info!(%addr, "server listening");

        let context = Arc::clone(&self.context);
        let should_stop = Arc::clone(&self.should_stop);
        let next_connection_id = Arc::clone(&self.next_connection_id);
        let dispatcher = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || run_dispatcher(listener, context, should_stop, next_connection_id))?;

        *self.local_addr.lock() = Some(addr);
        *self.dispatcher.lock() = Some(dispatcher);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Stop accepting and disconnect every participant.
    pub fn shutdown(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            if dispatcher.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
        self.context.registry.disconnect_all();
        info!("server stopped");
    }

    pub fn get_connected_clients(&self) -> Vec<String> {
        self.context
            .registry
            .participants()
            .iter()
            .map(|p| {
                let peer = p
                    .peer()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("{} ({}) from {}", p.display_name(), p.location(), peer)
            })
            .collect()
    }

    pub fn get_catalogued_files(&self) -> Vec<String> {
        self.context
            .catalog
            .list()
            .iter()
            .map(|e| format!("{} | {} | {} | {} bytes", e.unique_key, e.original_name, e.uploader, e.size))
            .collect()
    }
}

impl Drop for ServerProcessingEngine {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }
}

fn run_dispatcher(
    listener: TcpListener,
    context: Arc<ServerContext>,
    should_stop: Arc<AtomicBool>,
    next_connection_id: Arc<AtomicU64>,
) {
    while !should_stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let conn_id = next_connection_id.fetch_add(1, Ordering::SeqCst);
                debug!(conn = conn_id, peer = %addr, "accepted connection");

                let context = Arc::clone(&context);
                let spawned = thread::Builder::new()
                    .name(format!("conn-{}", conn_id))
                    .spawn(move || handle_client(&context, conn_id, stream, addr));
                if let Err(e) = spawned {
                    error!(conn = conn_id, error = %e, "failed to spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("dispatcher stopping");
}

fn handle_client(ctx: &ServerContext, conn_id: u64, stream: TcpStream, addr: SocketAddr) {
    match serve_connection(ctx, conn_id, stream) {
        Ok(()) => debug!(conn = conn_id, peer = %addr, "connection finished"),
        Err(e) if e.is_disconnect() => info!(conn = conn_id, peer = %addr, error = %e, "connection lost"),
        Err(e) => warn!(conn = conn_id, peer = %addr, error = %e, "connection closed"),
    }
}

/// Classify the connection by its first frame and run the matching session.
fn serve_connection(ctx: &ServerContext, conn_id: u64, mut stream: TcpStream) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(ctx.config.io_timeout)?;
    stream.set_write_timeout(ctx.config.io_timeout)?;

    let first = read_text_frame(&mut stream, ctx.config.max_text_frame)?;
    let request = match SessionRequest::parse(&first) {
        Ok(request) => request,
        Err(e) => {
            let _ = write_text_frame(&mut stream, &ServerFrame::system(e.to_string()).to_string());
            return Err(e);
        }
    };

    match request {
        SessionRequest::Upload(upload) => {
            let entry = transfer::handle_upload(ctx, &mut stream, upload)?;
            debug!(conn = conn_id, key = %entry.unique_key, "upload session done");
        }
        SessionRequest::Download { key } => {
            transfer::handle_download(ctx, &mut stream, &key)?;
        }
        SessionRequest::ListFiles => {
            transfer::handle_list(ctx, &mut stream)?;
        }
        SessionRequest::Identify { display_name } => {
            return match session::run_chat_session(ctx, conn_id, stream, display_name) {
                Err(ProtocolError::NameTaken(name)) => {
                    info!(conn = conn_id, name = %name, "refused duplicate display name");
                    Ok(())
                }
                other => other,
            };
        }
    }
    Ok(())
}
