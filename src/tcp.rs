//! Line oriented TCP plumbing for the control channel.
//!
//! - [`Server`] owns a listening socket (backlog 1) and hands out
//!   [`Connection`]s.
//! - [`Client`] connects out, optionally bounded by a [`crate::reactor::TimeoutWatcher`].
//! - [`Connection`] buffers both directions and never blocks unless one of the
//!   blocking calls (`read_line`, `read_bytes`, `write`) is used.
use std::net::{SocketAddr, ToSocketAddrs};

pub mod client;
pub mod connection;
pub mod error;
pub mod server;

pub use client::Client;
pub use connection::Connection;
pub use error::TcpError;
pub use server::Server;

/// Resolve a host name or dotted quad to its first IPv4 address
pub(crate) fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, TcpError> {
    let resolve_err = |reason: String| TcpError::Resolve {
        host: host.to_string(),
        reason,
    };
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_err(e.to_string()))?;
    addrs
        .find(|a| a.is_ipv4())
        .ok_or_else(|| resolve_err("no IPv4 address".to_string()))
}
