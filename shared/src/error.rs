//! Error taxonomy shared by the host and client managers

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// Bytes that are not a well-formed envelope, or an unknown message kind
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("encoded message is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("room is full")]
    RoomFull,

    #[error("join rejected: {reason}")]
    JoinRejected { reason: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Synced payload failed its count or checksum verification
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("a client session is still active")]
    SessionActive,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NetError {
    /// Expected conditions that a network loop swallows and keeps going on.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Protocol(_) => true,
            NetError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}
