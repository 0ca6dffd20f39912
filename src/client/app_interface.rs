// src/client/app_interface.rs

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::client::engine::ClientProcessingEngine;
use crate::common::protocol::{ServerFrame, ALL_INSPECTORS};

pub struct ClientAppInterface {
    engine: Arc<ClientProcessingEngine>,
}

impl ClientAppInterface {
    pub fn new(engine: Arc<ClientProcessingEngine>) -> Self {
        println!("Inspector Relay Client");
        println!("Available commands: connect, say, all, msg, alert, who, upload, download, files, help, quit");
        ClientAppInterface { engine }
    }

    pub fn read_commands(&self) -> Result<(), String> {
        loop {
            print!("> ");
            io::stdout().flush().map_err(|e| e.to_string())?;

            let mut command = String::new();
            match io::stdin().read_line(&mut command) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => continue,
            }

            let command = command.trim();
            if command.is_empty() {
                continue;
            }

            match self.handle_command(command) {
                Ok(should_quit) => {
                    if should_quit {
                        println!("Client shutdown complete.");
                        break;
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        Ok(())
    }

    fn handle_command(&self, command: &str) -> Result<bool, String> {
        let (verb, rest) = match command.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (command, ""),
        };
        let parts: Vec<&str> = rest.split_whitespace().collect();

        match verb {
            "quit" => {
                println!("Disconnecting from server...");
                self.engine.disconnect().map_err(|e| e.to_string())?;
                println!("Disconnected. Goodbye!");
                Ok(true)
            }

            "connect" => {
                if parts.len() < 4 {
                    return Err("Usage: connect <server IP> <server port> <name> <location>".to_string());
                }
                let location = parts[3..].join(" ");
                let roster = self
                    .engine
                    .connect(parts[0], parts[1], parts[2], &location)
                    .map_err(|e| e.to_string())?;
                println!("Connected to {}:{} as {}", parts[0], parts[1], parts[2]);
                print_roster(&roster);
                self.spawn_printer();
                Ok(false)
            }

            "say" => {
                require_text(rest, "say <text>")?;
                self.engine.say(rest).map_err(|e| e.to_string())?;
                Ok(false)
            }

            "all" => {
                require_text(rest, "all <text>")?;
                self.engine.send_to_all(rest).map_err(|e| e.to_string())?;
                Ok(false)
            }

            "msg" => {
                let (recipient, text) = rest
                    .split_once(' ')
                    .ok_or_else(|| "Usage: msg <name> <text>".to_string())?;
                self.engine.send_to(recipient, text.trim()).map_err(|e| e.to_string())?;
                Ok(false)
            }

            "alert" => {
                require_text(rest, "alert <text>")?;
                self.engine.alert(rest).map_err(|e| e.to_string())?;
                Ok(false)
            }

            "who" => {
                self.engine.request_roster().map_err(|e| e.to_string())?;
                Ok(false)
            }

            "upload" => {
                if parts.is_empty() {
                    return Err("Usage: upload <file path> [recipient]".to_string());
                }
                let recipient = if parts.len() > 1 {
                    parts[1..].join(" ")
                } else {
                    ALL_INSPECTORS.to_string()
                };
                let sender = self.engine.display_name().unwrap_or_else(|| "Central".to_string());

                let result = self
                    .engine
                    .upload_file(Path::new(parts[0]), &recipient, &sender)
                    .map_err(|e| e.to_string())?;
                println!(
                    "Uploaded {} ({} bytes) in {:.2} seconds",
                    result.original_name, result.transfer.bytes_transferred, result.transfer.execution_time
                );
                Ok(false)
            }

            "download" => {
                if parts.is_empty() || parts.len() > 2 {
                    return Err("Usage: download <key> [destination folder]".to_string());
                }
                let dest = Path::new(parts.get(1).copied().unwrap_or("."));
                match self.engine.download_file(parts[0], dest).map_err(|e| e.to_string())? {
                    Some((path, result)) => println!(
                        "Saved {} ({} bytes) in {:.2} seconds",
                        path.display(),
                        result.bytes_transferred,
                        result.execution_time
                    ),
                    None => println!("No file with key {}", parts[0]),
                }
                Ok(false)
            }

            "files" => {
                let files = self.engine.list_files().map_err(|e| e.to_string())?;
                if files.is_empty() {
                    println!("No files on the server.");
                } else {
                    println!("----------------------------------------");
                    for file in &files {
                        println!("* {} ({}) from {}", file.original_name, file.unique_key, file.uploader);
                    }
                    println!("----------------------------------------");
                }
                Ok(false)
            }

            "help" => {
                println!("Available commands:");
                println!("  connect <ip> <port> <name> <location> - Join the chat");
                println!("  say <text>                            - Plain message to everyone");
                println!("  all <text>                            - Chat message to everyone else");
                println!("  msg <name> <text>                     - Private message");
                println!("  alert <text>                          - Raise an alert");
                println!("  who                                   - Ask for the roster");
                println!("  upload <path> [recipient]             - Send a file");
                println!("  download <key> [folder]               - Fetch a file");
                println!("  files                                 - List files on the server");
                println!("  help                                  - Show this help message");
                println!("  quit                                  - Exit the program");
                Ok(false)
            }

            _ => {
                println!("Unrecognized command! Type 'help' for available commands.");
                Ok(false)
            }
        }
    }

    fn spawn_printer(&self) {
        let Some(incoming) = self.engine.incoming() else {
            return;
        };
        thread::spawn(move || {
            for frame in incoming.iter() {
                println!("{}", render(&frame));
            }
            println!("Connection to server closed.");
        });
    }
}

fn require_text(text: &str, usage: &str) -> Result<(), String> {
    if text.is_empty() {
        Err(format!("Usage: {}", usage))
    } else {
        Ok(())
    }
}

fn print_roster(roster: &[String]) {
    if roster.is_empty() {
        println!("Nobody else is connected.");
    } else {
        println!("Connected: {}", roster.join(", "));
    }
}

fn render(frame: &ServerFrame) -> String {
    match frame {
        ServerFrame::MessageFrom { sender, text, private: true } => format!("[private] {}: {}", sender, text),
        ServerFrame::MessageFrom { sender, text, .. } => format!("{}: {}", sender, text),
        ServerFrame::Alert { sender, text } => format!("*** ALERT from {}: {} ***", sender, text),
        ServerFrame::Connected(name) => format!("{} joined", name),
        ServerFrame::Disconnected(name) => format!("{} left", name),
        ServerFrame::Roster(names) if names.is_empty() => "Nobody else is connected.".to_string(),
        ServerFrame::Roster(names) => format!("Connected: {}", names.join(", ")),
        ServerFrame::FileAvailable { key, sender, original_name } => {
            format!("{} shared {} (download {})", sender, original_name, key)
        }
        ServerFrame::Report { text, .. } => format!("Report: {}", text),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_command() {
        let engine = Arc::new(ClientProcessingEngine::new());
        let interface = ClientAppInterface::new(engine);

        assert!(!interface.handle_command("help").unwrap());
    }

    #[test]
    fn test_invalid_command() {
        let engine = Arc::new(ClientProcessingEngine::new());
        let interface = ClientAppInterface::new(engine);

        assert!(!interface.handle_command("invalid_command").unwrap());
    }

    #[test]
    fn test_usage_errors() {
        let engine = Arc::new(ClientProcessingEngine::new());
        let interface = ClientAppInterface::new(engine);

        assert!(interface.handle_command("connect 127.0.0.1").is_err());
        assert!(interface.handle_command("msg Ana").is_err());
        assert!(interface.handle_command("say").is_err());
        assert!(interface.handle_command("say hi").is_err(), "not connected");
    }

    #[test]
    fn test_render_private_and_alert() {
        assert_eq!(
            render(&ServerFrame::MessageFrom {
                sender: "Ana".into(),
                text: "oi".into(),
                private: true
            }),
            "[private] Ana: oi"
        );
        assert_eq!(
            render(&ServerFrame::Alert {
                sender: "Ana".into(),
                text: "enchente".into()
            }),
            "*** ALERT from Ana: enchente ***"
        );
    }
}
