// src/common/protocol.rs

//! The text grammar of the relay.
//!
//! Every inbound frame is parsed exactly once into one of the enums below and
//! every outbound frame is produced from one, so the tag strings live only in
//! this file.

use std::fmt;

use crate::common::error::{ProtocolError, Result};

pub const UPLOAD_PREFIX: &str = "ARQUIVO:";
pub const DOWNLOAD_PREFIX: &str = "DOWNLOAD:";
pub const LIST_FILES: &str = "LISTAR_ARQUIVOS";
pub const FILE_RECEIVED: &str = "ARQUIVO_RECEBIDO";
pub const DOWNLOAD_STARTING: &str = "INICIANDO_DOWNLOAD";
pub const LEAVE: &str = "SAIR";

pub const CHAT_PREFIX: &str = "CHAT:";
const CHAT_LIST_ROSTER: &str = "LISTAR_INSPETORES";
const CHAT_TO: &str = "PARA:";
const CHAT_ALERT: &str = "ALERTA:";
const CHAT_MESSAGE_FROM: &str = "MSG_DE:";
const CHAT_CONNECTED: &str = "CONECTADO:";
const CHAT_DISCONNECTED: &str = "DESCONECTADO:";
const CHAT_ROSTER: &str = "LISTA_INSPETORES:";

const ALERT_PREFIX: &str = "ALERTA:";
const WELCOME_PREFIX: &str = "BEMVINDO:";
const LOCATION_PREFIX: &str = "LOCAL:";
const FULL_REPORT_PREFIX: &str = "RELATORIO_COMPLETO:";
const DIRECT_REPORT_PREFIX: &str = "RELATORIO_DIRETO:";

/// Chat recipient meaning "every other participant".
pub const EVERYONE: &str = "Todos";
/// Upload recipient meaning "every participant".
pub const ALL_INSPECTORS: &str = "Todos os Inspetores";
/// Sender name used on notices generated by the server itself.
pub const SYSTEM_SENDER: &str = "Sistema";
pub const PRIVATE_SUFFIX: &str = " [PRIVADO]";
/// Opening of the system notice that refuses a display name.
pub const NAME_TAKEN_NOTICE: &str = "name already in use";

/// Names no participant may register under.
pub const RESERVED_NAMES: [&str; 3] = [EVERYONE, ALL_INSPECTORS, SYSTEM_SENDER];

/// Metadata that opens an upload connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub original_name: String,
    pub recipient: String,
    pub sender: String,
}

/// What a freshly accepted connection wants, decided by its first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Upload(UploadRequest),
    Download { key: String },
    ListFiles,
    /// The frame is a display name; the location follows in the next frame.
    Identify { display_name: String },
}

impl SessionRequest {
    pub fn parse(frame: &str) -> Result<Self> {
        if let Some(rest) = frame.strip_prefix(UPLOAD_PREFIX) {
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
                return Err(ProtocolError::MalformedFrame(format!(
                    "expected ARQUIVO:<name>:<recipient>:<sender>, got '{}'",
                    frame
                )));
            }
            if parts[0].contains(['|', ';']) {
                return Err(ProtocolError::MalformedFrame(format!(
                    "file name '{}' contains a reserved character",
                    parts[0]
                )));
            }
            return Ok(SessionRequest::Upload(UploadRequest {
                original_name: parts[0].to_string(),
                recipient: parts[1].to_string(),
                sender: parts[2].to_string(),
            }));
        }

        if let Some(key) = frame.strip_prefix(DOWNLOAD_PREFIX) {
            if key.is_empty() {
                return Err(ProtocolError::MalformedFrame("empty download key".to_string()));
            }
            return Ok(SessionRequest::Download { key: key.to_string() });
        }

        if frame == LIST_FILES {
            return Ok(SessionRequest::ListFiles);
        }

        validate_display_name(frame)?;
        Ok(SessionRequest::Identify {
            display_name: frame.to_string(),
        })
    }
}

/// Display names travel inside `:`-separated frames and the comma separated
/// roster, so neither separator may appear in one.
pub fn validate_display_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ProtocolError::MalformedFrame("empty display name".to_string()));
    }
    if name.contains([':', ',']) {
        return Err(ProtocolError::MalformedFrame(format!(
            "display name '{}' contains ':' or ','",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Full,
    Direct,
}

impl ReportKind {
    fn prefix(self) -> &'static str {
        match self {
            ReportKind::Full => FULL_REPORT_PREFIX,
            ReportKind::Direct => DIRECT_REPORT_PREFIX,
        }
    }
}

/// A frame sent by an identified participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Leave,
    RosterRequest,
    /// `CHAT:PARA:Todos:<text>`
    Broadcast { text: String },
    Directed { recipient: String, text: String },
    /// `CHAT:ALERTA:<text>` or the bare `ALERTA:<text>` alias.
    Alert { text: String },
    Report { kind: ReportKind, text: String },
    /// Untagged text.
    Plain { text: String },
    /// A `CHAT:` sub-tag nobody understands.
    Unknown { tag: String },
}

impl ChatCommand {
    pub fn parse(frame: &str) -> Result<Self> {
        if frame == LEAVE {
            return Ok(ChatCommand::Leave);
        }

        if let Some(rest) = frame.strip_prefix(CHAT_PREFIX) {
            if rest.starts_with(CHAT_LIST_ROSTER) {
                return Ok(ChatCommand::RosterRequest);
            }
            if let Some(addressed) = rest.strip_prefix(CHAT_TO) {
                let (recipient, text) = addressed.split_once(':').ok_or_else(|| {
                    ProtocolError::MalformedFrame(format!(
                        "expected CHAT:PARA:<name>:<text>, got '{}'",
                        frame
                    ))
                })?;
                if recipient.is_empty() {
                    return Err(ProtocolError::MalformedFrame("empty chat recipient".to_string()));
                }
                return Ok(if recipient == EVERYONE {
                    ChatCommand::Broadcast { text: text.to_string() }
                } else {
                    ChatCommand::Directed {
                        recipient: recipient.to_string(),
                        text: text.to_string(),
                    }
                });
            }
            if let Some(text) = rest.strip_prefix(CHAT_ALERT) {
                return Ok(ChatCommand::Alert { text: text.to_string() });
            }
            let tag = rest.split(':').next().unwrap_or_default();
            return Ok(ChatCommand::Unknown { tag: tag.to_string() });
        }

        if let Some(text) = frame.strip_prefix(ALERT_PREFIX) {
            return Ok(ChatCommand::Alert { text: text.to_string() });
        }
        if let Some(text) = frame.strip_prefix(FULL_REPORT_PREFIX) {
            return Ok(ChatCommand::Report {
                kind: ReportKind::Full,
                text: text.to_string(),
            });
        }
        if let Some(text) = frame.strip_prefix(DIRECT_REPORT_PREFIX) {
            return Ok(ChatCommand::Report {
                kind: ReportKind::Direct,
                text: text.to_string(),
            });
        }

        Ok(ChatCommand::Plain { text: frame.to_string() })
    }
}

impl fmt::Display for ChatCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatCommand::Leave => f.write_str(LEAVE),
            ChatCommand::RosterRequest => write!(f, "{}{}", CHAT_PREFIX, CHAT_LIST_ROSTER),
            ChatCommand::Broadcast { text } => {
                write!(f, "{}{}{}:{}", CHAT_PREFIX, CHAT_TO, EVERYONE, text)
            }
            ChatCommand::Directed { recipient, text } => {
                write!(f, "{}{}{}:{}", CHAT_PREFIX, CHAT_TO, recipient, text)
            }
            ChatCommand::Alert { text } => write!(f, "{}{}{}", CHAT_PREFIX, CHAT_ALERT, text),
            ChatCommand::Report { kind, text } => write!(f, "{}{}", kind.prefix(), text),
            ChatCommand::Plain { text } => f.write_str(text),
            ChatCommand::Unknown { tag } => write!(f, "{}{}", CHAT_PREFIX, tag),
        }
    }
}

/// A frame produced by the server for a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Welcome(String),
    Location(String),
    Roster(Vec<String>),
    MessageFrom { sender: String, text: String, private: bool },
    Connected(String),
    Disconnected(String),
    Alert { sender: String, text: String },
    Report { kind: ReportKind, text: String },
    FileAvailable { key: String, sender: String, original_name: String },
    /// Anything without a recognised tag, e.g. `<name> (<location>): <text>`.
    Text(String),
}

impl ServerFrame {
    pub fn system(text: impl Into<String>) -> Self {
        ServerFrame::MessageFrom {
            sender: SYSTEM_SENDER.to_string(),
            text: text.into(),
            private: false,
        }
    }

    /// The notice that refuses `name` at identification.
    pub fn name_taken(name: &str) -> Self {
        ServerFrame::system(format!("{}: {}", NAME_TAKEN_NOTICE, name))
    }

    /// The refused name, if this is the notice built by [`ServerFrame::name_taken`].
    pub fn refused_name(&self) -> Option<&str> {
        match self {
            ServerFrame::MessageFrom { sender, text, .. } if sender == SYSTEM_SENDER => text
                .strip_prefix(NAME_TAKEN_NOTICE)
                .and_then(|rest| rest.strip_prefix(": ")),
            _ => None,
        }
    }

    pub fn chatter(sender: &str, location: &str, text: &str) -> Self {
        ServerFrame::Text(format!("{} ({}): {}", sender, location, text))
    }

    /// Best-effort decoding on the client side; unknown shapes become `Text`.
    pub fn parse(frame: &str) -> Self {
        if let Some(rest) = frame.strip_prefix(CHAT_PREFIX) {
            if let Some(csv) = rest.strip_prefix(CHAT_ROSTER) {
                return ServerFrame::Roster(split_roster(csv));
            }
            if let Some(body) = rest.strip_prefix(CHAT_MESSAGE_FROM) {
                if let Some((sender, text)) = body.split_once(':') {
                    let (text, private) = match text.strip_suffix(PRIVATE_SUFFIX) {
                        Some(stripped) => (stripped, true),
                        None => (text, false),
                    };
                    return ServerFrame::MessageFrom {
                        sender: sender.to_string(),
                        text: text.to_string(),
                        private,
                    };
                }
            }
            if let Some(name) = rest.strip_prefix(CHAT_CONNECTED) {
                return ServerFrame::Connected(name.to_string());
            }
            if let Some(name) = rest.strip_prefix(CHAT_DISCONNECTED) {
                return ServerFrame::Disconnected(name.to_string());
            }
            if let Some(body) = rest.strip_prefix(CHAT_ALERT) {
                if let Some((sender, text)) = body.split_once(':') {
                    return ServerFrame::Alert {
                        sender: sender.to_string(),
                        text: text.to_string(),
                    };
                }
            }
        }
        if let Some(name) = frame.strip_prefix(WELCOME_PREFIX) {
            return ServerFrame::Welcome(name.to_string());
        }
        if let Some(location) = frame.strip_prefix(LOCATION_PREFIX) {
            return ServerFrame::Location(location.to_string());
        }
        if let Some(text) = frame.strip_prefix(FULL_REPORT_PREFIX) {
            return ServerFrame::Report {
                kind: ReportKind::Full,
                text: text.to_string(),
            };
        }
        if let Some(text) = frame.strip_prefix(DIRECT_REPORT_PREFIX) {
            return ServerFrame::Report {
                kind: ReportKind::Direct,
                text: text.to_string(),
            };
        }
        if let Some(body) = frame.strip_prefix(UPLOAD_PREFIX) {
            let mut parts = body.splitn(3, ':');
            if let (Some(key), Some(sender), Some(original_name)) =
                (parts.next(), parts.next(), parts.next())
            {
                return ServerFrame::FileAvailable {
                    key: key.to_string(),
                    sender: sender.to_string(),
                    original_name: original_name.to_string(),
                };
            }
        }
        ServerFrame::Text(frame.to_string())
    }
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFrame::Welcome(name) => write!(f, "{}{}", WELCOME_PREFIX, name),
            ServerFrame::Location(location) => write!(f, "{}{}", LOCATION_PREFIX, location),
            ServerFrame::Roster(names) => {
                write!(f, "{}{}{}", CHAT_PREFIX, CHAT_ROSTER, names.join(","))
            }
            ServerFrame::MessageFrom { sender, text, private } => {
                write!(f, "{}{}{}:{}", CHAT_PREFIX, CHAT_MESSAGE_FROM, sender, text)?;
                if *private {
                    f.write_str(PRIVATE_SUFFIX)?;
                }
                Ok(())
            }
            ServerFrame::Connected(name) => write!(f, "{}{}{}", CHAT_PREFIX, CHAT_CONNECTED, name),
            ServerFrame::Disconnected(name) => {
                write!(f, "{}{}{}", CHAT_PREFIX, CHAT_DISCONNECTED, name)
            }
            ServerFrame::Alert { sender, text } => {
                write!(f, "{}{}{}:{}", CHAT_PREFIX, CHAT_ALERT, sender, text)
            }
            ServerFrame::Report { kind, text } => write!(f, "{}{}", kind.prefix(), text),
            ServerFrame::FileAvailable { key, sender, original_name } => {
                write!(f, "{}{}:{}:{}", UPLOAD_PREFIX, key, sender, original_name)
            }
            ServerFrame::Text(text) => f.write_str(text),
        }
    }
}

fn split_roster(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
