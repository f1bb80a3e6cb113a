use std::fmt::Display;

use tokio::io::AsyncRead;

pub mod client;
pub mod errors;
pub mod handler;

pub use errors::SessionError;

#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct ConnectionID(u32);

impl Display for ConnectionID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one session. The collector only ever sees `Active` and
/// `Closed`; an agent walks through all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Active,
    Closed,
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Byte source of an inbound session.
pub trait Streamer: AsyncRead + std::marker::Unpin + Send {}

impl<T: AsyncRead + std::marker::Unpin + Send> Streamer for T {}
