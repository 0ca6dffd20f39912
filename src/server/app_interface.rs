// src/server/app_interface.rs

use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::server::engine::ServerProcessingEngine;

pub struct ServerAppInterface {
    engine: Arc<ServerProcessingEngine>,
    shutdown_sender: mpsc::Sender<()>,
}

impl ServerAppInterface {
    pub fn new(engine: Arc<ServerProcessingEngine>, shutdown_sender: mpsc::Sender<()>) -> Self {
        ServerAppInterface {
            engine,
            shutdown_sender,
        }
    }

    pub async fn read_commands(&self) -> Result<(), String> {
        println!("Server interface ready. Available commands: 'list', 'files', 'quit', 'help'");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("> ");
            io::stdout().flush().map_err(|e| e.to_string())?;

            let command = match lines.next_line().await {
                Ok(Some(line)) => line,
                // No console attached: serve until Ctrl-C.
                Ok(None) => {
                    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
                    self.handle_command("quit").await?;
                    return Ok(());
                }
                Err(_) => continue,
            };

            let command = command.trim();
            if command.is_empty() {
                continue;
            }

            match self.handle_command(command).await {
                Ok(should_quit) => {
                    if should_quit {
                        break;
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        Ok(())
    }

    async fn handle_command(&self, command: &str) -> Result<bool, String> {
        match command {
            "quit" => {
                println!("Shutting down server...");
                let engine = Arc::clone(&self.engine);
                tokio::task::spawn_blocking(move || engine.shutdown())
                    .await
                    .map_err(|e| e.to_string())?;
                let _ = self.shutdown_sender.send(()).await;
                println!("Server shutdown complete.");
                Ok(true)
            }

            "list" => {
                let clients = self.engine.get_connected_clients();
                if clients.is_empty() {
                    println!("No inspectors currently connected.");
                } else {
                    println!("\nConnected Inspectors:");
                    println!("----------------------------------------");
                    for client_info in &clients {
                        println!("{}", client_info);
                    }
                    println!("----------------------------------------");
                    println!("Total connected inspectors: {}", clients.len());
                }
                Ok(false)
            }

            "files" => {
                let files = self.engine.get_catalogued_files();
                if files.is_empty() {
                    println!("No files uploaded yet.");
                } else {
                    println!("\nCatalogued Files:");
                    println!("----------------------------------------");
                    for file in &files {
                        println!("{}", file);
                    }
                    println!("----------------------------------------");
                    println!("Total files: {}", files.len());
                }
                Ok(false)
            }

            "help" => {
                println!("Available commands:");
                println!("  list  - List all connected inspectors");
                println!("  files - List all uploaded files");
                println!("  help  - Show this help message");
                println!("  quit  - Shutdown the server");
                Ok(false)
            }

            _ => {
                println!("Unrecognized command! Available commands: 'list', 'files', 'help', 'quit'");
                Ok(false)
            }
        }
    }
}
