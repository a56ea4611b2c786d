//! Listening side of the control channel
use super::{resolve_ipv4, Connection, TcpError};
use crate::reactor::{EventWatcher, SockAcceptEvent};
use log::{debug, info};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io,
    net::{SocketAddr, TcpListener},
    sync::Arc,
};

/// A single-client listening socket.
///
/// Listens with a backlog of one: the control protocol talks to one client
/// at a time, further clients wait in the OS queue or are refused.
pub struct Server {
    listener: TcpListener,
    accept_event: Arc<SockAcceptEvent>,
    interface: String,
    port: u16,
}

impl Server {
    /// Bind to `interface:port`.  Port 0 lets the OS pick; the port actually
    /// bound is available from [`Server::get_port`] afterwards.
    pub fn bind(port: u16, interface: &str) -> Result<Server, TcpError> {
        let address = resolve_ipv4(interface, port)?;
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(TcpError::Socket)?;
        if port != 0 {
            socket.set_reuse_address(true).map_err(TcpError::Socket)?;
        }
        socket
            .bind(&SockAddr::from(address))
            .map_err(|source| TcpError::Bind { address, source })?;

        let actual = socket
            .local_addr()
            .map_err(TcpError::Socket)?
            .as_socket()
            .map(|a| a.port())
            .unwrap_or(0);
        if actual == 0 || (port != 0 && actual != port) {
            return Err(TcpError::PortMismatch {
                requested: port,
                actual,
            });
        }

        socket.listen(1).map_err(TcpError::Listen)?;
        socket.set_nonblocking(true).map_err(TcpError::Socket)?;
        let listener = TcpListener::from(socket);
        let accept_event = Arc::new(SockAcceptEvent::new(&listener));
        info!("listening on {}:{}", address.ip(), actual);
        Ok(Server {
            listener,
            accept_event,
            interface: interface.to_string(),
            port: actual,
        })
    }

    /// Accept a pending connection, `None` if nobody is waiting
    pub fn try_accept(&self) -> Result<Option<Connection>, TcpError> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!("accepted connection from {}", peer);
                Ok(Some(Connection::from_stream(stream)?))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Block until a client connects
    pub fn accept(&self) -> Result<Connection, TcpError> {
        let mut watcher = EventWatcher::new();
        watcher.observe(&self.accept_event);
        loop {
            if let Some(conn) = self.try_accept()? {
                return Ok(conn);
            }
            watcher.wait()?;
        }
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_interface(&self) -> &str {
        &self.interface
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TcpError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn accept_event(&self) -> &Arc<SockAcceptEvent> {
        &self.accept_event
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_event.invalidate();
        debug!("closing server on port {}", self.port);
    }
}
