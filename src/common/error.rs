// src/common/error.rs

use std::io;
use thiserror::Error;

/// Every way a connection, a transfer or a routed message can fail.
///
/// None of these are retried. They end the affected connection (or, for
/// `RecipientNotFound` and a malformed chat command, just the command).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("display name '{0}' is already in use")]
    NameTaken(String),

    #[error("transfer truncated after {received} of {expected} bytes")]
    TruncatedTransfer { expected: u64, received: u64 },

    #[error("{0} not found")]
    RecipientNotFound(String),

    #[error("file key '{0}' is already catalogued")]
    KeyCollision(String),

    #[error("connection lost: {0}")]
    ConnectionLost(#[from] io::Error),
}

impl ProtocolError {
    /// True when the peer went away, as opposed to misbehaving.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed | ProtocolError::ConnectionLost(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
