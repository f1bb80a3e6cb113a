use std::io;

use thiserror::Error;

use crate::protocol::FrameError;

/// Why a collector session ended. Every variant is fatal for the session
/// that produced it and for nothing else.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection closed by peer")]
    Closed,

    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("undecodable report: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("dispatch queue closed")]
    QueueClosed,
}

impl SessionError {
    /// Normal ways for an agent to go away. These are logged quietly.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
