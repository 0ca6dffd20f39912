// src/bin/client.rs

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use inspector_relay::client::{app_interface::ClientAppInterface, engine::ClientProcessingEngine};

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "inspector_relay=warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let engine = Arc::new(ClientProcessingEngine::new());
    let interface = ClientAppInterface::new(Arc::clone(&engine));

    println!("Use 'connect <server_ip> <port> <name> <location>' to join");
    println!("Type 'help' for list of available commands\n");

    interface.read_commands()?;

    Ok(())
}
