use crate::reactor::ReactorError;
use std::{io, net::SocketAddr};
use thiserror::Error;

/// Failures of the TCP layer.  All of them carry the OS error text.
#[derive(Debug, Error)]
pub enum TcpError {
    #[error("cannot resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
    #[error("cannot create socket: {0}")]
    Socket(#[source] io::Error),
    #[error("cannot bind to {address}: {source}")]
    Bind { address: SocketAddr, source: io::Error },
    #[error("bound to port {actual} instead of requested port {requested}")]
    PortMismatch { requested: u16, actual: u16 },
    #[error("cannot listen: {0}")]
    Listen(#[source] io::Error),
    #[error("cannot connect to {address}: {source}")]
    Connect { address: SocketAddr, source: io::Error },
    #[error("timeout connecting to {address}")]
    ConnectTimeout { address: SocketAddr },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Reactor(#[from] ReactorError),
}
