//! `WSAPoll` backend; notifications use a connected loopback socket pair
use super::{AsDescriptor, Multiplexer, PollRequest, Readiness};
use log::warn;
use std::{
    io::{self, Read, Write},
    net::{Ipv4Addr, TcpListener, TcpStream},
    os::windows::io::{AsRawSocket, RawSocket},
    time::Duration,
};
use windows_sys::Win32::Networking::WinSock::{
    WSAPoll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM, POLLWRNORM, SOCKET, SOCKET_ERROR,
    WSAEWOULDBLOCK, WSAPOLLFD,
};

pub type RawDescriptor = SOCKET;

impl<T: AsRawSocket> AsDescriptor for T {
    fn as_descriptor(&self) -> RawDescriptor {
        self.as_raw_socket() as RawSocket as SOCKET
    }
}

/// Small sets are polled from a stack array
const INLINE_FDS: usize = 16;
const UNUSED_FD: WSAPOLLFD = WSAPOLLFD {
    fd: 0,
    events: 0,
    revents: 0,
};

pub struct Platform;

impl Multiplexer for Platform {
    fn wait(requests: &mut [PollRequest], timeout: Option<Duration>) -> io::Result<usize> {
        if requests.is_empty() {
            // WSAPoll rejects an empty set
            match timeout {
                Some(d) => std::thread::sleep(d),
                None => return Err(io::Error::from(io::ErrorKind::InvalidInput)),
            }
            return Ok(0);
        }
        let mut inline = [UNUSED_FD; INLINE_FDS];
        let mut spilled: Vec<WSAPOLLFD>;
        let fds: &mut [WSAPOLLFD] = if requests.len() <= INLINE_FDS {
            &mut inline[..requests.len()]
        } else {
            spilled = vec![UNUSED_FD; requests.len()];
            &mut spilled
        };
        for (fd, r) in fds.iter_mut().zip(requests.iter()) {
            fd.fd = r.descriptor;
            fd.events = match r.readiness {
                Readiness::Read => POLLRDNORM,
                Readiness::Write => POLLWRNORM,
            };
        }
        let rv = unsafe {
            WSAPoll(
                fds.as_mut_ptr(),
                fds.len() as u32,
                super::timeout_millis(timeout),
            )
        };
        if rv == SOCKET_ERROR {
            return Err(io::Error::last_os_error());
        }
        for (req, fd) in requests.iter_mut().zip(fds.iter()) {
            req.ready = fd.revents & (fd.events | POLLERR | POLLHUP | POLLNVAL) != 0;
        }
        Ok(rv as usize)
    }

    fn connect_in_progress(err: &io::Error) -> bool {
        err.raw_os_error() == Some(WSAEWOULDBLOCK) || err.kind() == io::ErrorKind::WouldBlock
    }
}

pub struct NotifyPipe {
    reader: TcpStream,
    writer: TcpStream,
}

impl NotifyPipe {
    pub fn new() -> io::Result<NotifyPipe> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let writer = TcpStream::connect(listener.local_addr()?)?;
        let (reader, _) = listener.accept()?;
        writer.set_nodelay(true)?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(NotifyPipe { reader, writer })
    }

    pub fn read_descriptor(&self) -> RawDescriptor {
        self.reader.as_descriptor()
    }

    pub fn set(&self) {
        if let Err(e) = (&self.writer).write(&[1u8]) {
            if e.kind() != io::ErrorKind::WouldBlock {
                warn!("notify socket write failed: {}", e);
            }
        }
    }

    pub fn reset(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.reader).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}
