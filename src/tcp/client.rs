//! Outgoing connections
use super::{resolve_ipv4, Connection, TcpError};
use crate::reactor::{
    sys::{Multiplexer, Platform},
    EventWatcher, SockWriteEvent, TimeoutWatcher,
};
use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{net::TcpStream, sync::Arc};

pub struct Client;

impl Client {
    /// Blocking connect
    pub fn connect(host: &str, port: u16) -> Result<Connection, TcpError> {
        let address = resolve_ipv4(host, port)?;
        let stream =
            TcpStream::connect(address).map_err(|source| TcpError::Connect { address, source })?;
        Connection::from_stream(stream)
    }

    /// Connect, giving up when the watcher's deadline passes first.
    ///
    /// Only the deadline of `watcher` is used, the other events it observes
    /// are not waited on and may stay signaled.
    pub fn connect_with_timeout(
        host: &str,
        port: u16,
        watcher: &TimeoutWatcher,
    ) -> Result<Connection, TcpError> {
        let address = resolve_ipv4(host, port)?;
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(TcpError::Socket)?;
        socket.set_nonblocking(true).map_err(TcpError::Socket)?;

        match socket.connect(&SockAddr::from(address)) {
            Ok(()) => (),
            Err(e) if Platform::connect_in_progress(&e) => {
                let writable = Arc::new(SockWriteEvent::new(&socket));
                let mut connecting = EventWatcher::new();
                connecting.observe(watcher.timeout_event());
                connecting.observe(&writable);
                let outcome = loop {
                    let signaled = match connecting.wait() {
                        Ok(s) => s,
                        Err(e) => break Err(TcpError::from(e)),
                    };
                    if signaled.contains(writable.as_ref()) {
                        break Ok(());
                    }
                    if watcher.timed_out(&signaled) {
                        break Err(TcpError::ConnectTimeout { address });
                    }
                };
                writable.invalidate();
                outcome?;
                if let Some(source) = socket.take_error().map_err(TcpError::Socket)? {
                    return Err(TcpError::Connect { address, source });
                }
            }
            Err(source) => return Err(TcpError::Connect { address, source }),
        }
        debug!("connected to {}", address);
        Connection::from_stream(TcpStream::from(socket))
    }
}
