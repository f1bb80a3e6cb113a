//! fleetbeat: host heartbeats over plain TCP.
//!
//! Agents ([`connection::client::Client`]) push a framed JSON [`Report`] to
//! one or more collectors on a fixed interval. A collector ([`server::Server`])
//! reassembles frames per session, stamps each report with the peer IP and
//! keeps a [`registry::Registry`] of which hosts are still alive.

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod telemetry;

pub use error::{Error, Result};
pub use protocol::report::Report;
