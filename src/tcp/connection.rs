//! Buffered, non-blocking socket wrapper
use super::TcpError;
use crate::reactor::{EventWatcher, SockReadEvent, SockWriteEvent, WakeupEvent};
use log::{debug, trace};
use std::{
    io::{self, Read, Write},
    net::{IpAddr, SocketAddr, TcpStream},
    sync::Arc,
};

const READ_CHUNK: usize = 4096;

/// One established TCP peer.
///
/// Incoming data only enters `inbuf` through non-blocking reads, outgoing
/// data only leaves `outbuf` through non-blocking writes.  Once a zero
/// length read has been seen the connection stays closed.
pub struct Connection {
    stream: TcpStream,
    read_event: Arc<SockReadEvent>,
    write_event: Arc<SockWriteEvent>,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    peer: SocketAddr,
    closed: bool,
}

impl Connection {
    pub fn from_stream(stream: TcpStream) -> Result<Connection, TcpError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let read_event = Arc::new(SockReadEvent::new(&stream));
        let write_event = Arc::new(SockWriteEvent::new(&stream));
        debug!("connection established with {}", peer);
        Ok(Connection {
            stream,
            read_event,
            write_event,
            inbuf: Vec::new(),
            outbuf: Vec::new(),
            peer,
            closed: false,
        })
    }

    /// Pull whatever the socket has into the inbound buffer without blocking
    fn fill(&mut self) -> Result<(), TcpError> {
        let mut chunk = [0u8; READ_CHUNK];
        while !self.closed {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("peer {} closed the connection", self.peer);
                    self.closed = true;
                }
                Ok(n) => {
                    trace!("read {} bytes from {}", n, self.peer);
                    self.inbuf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Push as much of the outbound buffer as the socket takes right now
    fn flush_some(&mut self) -> Result<(), TcpError> {
        while !self.outbuf.is_empty() {
            match self.stream.write(&self.outbuf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.outbuf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn wait_for<E: WakeupEvent + 'static>(event: &Arc<E>) -> Result<(), TcpError> {
        let mut watcher = EventWatcher::new();
        watcher.observe(event);
        watcher.wait()?;
        Ok(())
    }

    fn take_inbound(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.inbuf.len());
        self.inbuf.drain(..n).collect()
    }

    pub fn can_read_line(&mut self, delim: u8) -> Result<bool, TcpError> {
        self.fill()?;
        Ok(self.inbuf.contains(&delim))
    }

    pub fn can_read_bytes(&mut self, n: usize) -> Result<bool, TcpError> {
        self.fill()?;
        Ok(self.inbuf.len() >= n)
    }

    /// Blocks until a full line is buffered and returns it including the
    /// delimiter.  After the peer closed, whatever is left is returned
    /// without a delimiter (possibly empty).
    pub fn read_line(&mut self, delim: u8) -> Result<String, TcpError> {
        loop {
            if self.can_read_line(delim)? {
                let end = self.inbuf.iter().position(|b| *b == delim).unwrap_or(0) + 1;
                let line = self.take_inbound(end);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if self.closed {
                let len = self.inbuf.len();
                let rest = self.take_inbound(len);
                return Ok(String::from_utf8_lossy(&rest).into_owned());
            }
            Self::wait_for(&self.read_event)?;
        }
    }

    /// Blocks until `n` bytes are buffered.  Returns fewer only when the
    /// peer closed first.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TcpError> {
        loop {
            if self.can_read_bytes(n)? || self.closed {
                return Ok(self.take_inbound(n));
            }
            Self::wait_for(&self.read_event)?;
        }
    }

    /// True once the peer closed its side.  Reads ahead if nothing is buffered.
    pub fn eof(&mut self) -> Result<bool, TcpError> {
        if self.inbuf.is_empty() {
            self.fill()?;
        }
        Ok(self.closed)
    }

    /// Queue data and send what can be sent without blocking
    pub fn try_write(&mut self, data: &[u8]) -> Result<(), TcpError> {
        self.outbuf.extend_from_slice(data);
        self.flush_some()
    }

    /// Queue data and block until everything buffered is sent
    pub fn write(&mut self, data: &[u8]) -> Result<(), TcpError> {
        self.outbuf.extend_from_slice(data);
        loop {
            self.flush_some()?;
            if self.outbuf.is_empty() {
                return Ok(());
            }
            Self::wait_for(&self.write_event)?;
        }
    }

    pub fn needs_write(&self) -> bool {
        !self.outbuf.is_empty()
    }

    pub fn buffered_incoming_bytes(&self) -> usize {
        self.inbuf.len()
    }

    pub fn buffered_outgoing_bytes(&self) -> usize {
        self.outbuf.len()
    }

    pub fn peer_address(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn peer_port(&self) -> u16 {
        self.peer.port()
    }

    pub fn read_event(&self) -> &Arc<SockReadEvent> {
        &self.read_event
    }

    pub fn write_event(&self) -> &Arc<SockWriteEvent> {
        &self.write_event
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // watchers elsewhere may still hold the events, the descriptor is about to go
        self.read_event.invalidate();
        self.write_event.invalidate();
        debug!("closing connection to {}", self.peer);
    }
}
