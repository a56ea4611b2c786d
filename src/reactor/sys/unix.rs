//! `poll(2)` backend with a self-pipe for notifications
use super::{AsDescriptor, Multiplexer, PollRequest, Readiness};
use log::warn;
use std::{
    io,
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

pub type RawDescriptor = RawFd;

impl<T: AsRawFd> AsDescriptor for T {
    fn as_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}

/// Small sets are polled from a stack array
const INLINE_FDS: usize = 16;
const UNUSED_FD: libc::pollfd = libc::pollfd {
    fd: -1,
    events: 0,
    revents: 0,
};

pub struct Platform;

impl Multiplexer for Platform {
    fn wait(requests: &mut [PollRequest], timeout: Option<Duration>) -> io::Result<usize> {
        let mut inline = [UNUSED_FD; INLINE_FDS];
        let mut spilled: Vec<libc::pollfd>;
        let fds: &mut [libc::pollfd] = if requests.len() <= INLINE_FDS {
            &mut inline[..requests.len()]
        } else {
            spilled = vec![UNUSED_FD; requests.len()];
            &mut spilled
        };
        for (fd, r) in fds.iter_mut().zip(requests.iter()) {
            fd.fd = r.descriptor;
            fd.events = match r.readiness {
                Readiness::Read => libc::POLLIN,
                Readiness::Write => libc::POLLOUT,
            };
        }
        let millis = super::timeout_millis(timeout);
        let count = loop {
            let rv = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
            if rv >= 0 {
                break rv as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };
        for (req, fd) in requests.iter_mut().zip(fds.iter()) {
            // errors and hangups are reported as ready so the owner sees them on the next read
            req.ready = fd.revents
                & (fd.events | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL)
                != 0;
        }
        Ok(count)
    }

    fn connect_in_progress(err: &io::Error) -> bool {
        err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
    }
}

/// Pipe whose read end becomes readable while the notification is set
pub struct NotifyPipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl NotifyPipe {
    pub fn new() -> io::Result<NotifyPipe> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let pipe = NotifyPipe {
            read_fd: fds[0],
            write_fd: fds[1],
        };
        for fd in fds {
            set_nonblocking_cloexec(fd)?;
        }
        Ok(pipe)
    }

    pub fn read_descriptor(&self) -> RawDescriptor {
        self.read_fd
    }

    pub fn set(&self) {
        let byte = [1u8];
        let rv = unsafe { libc::write(self.write_fd, byte.as_ptr() as *const libc::c_void, 1) };
        if rv < 0 {
            let err = io::Error::last_os_error();
            // a full pipe is still readable, which is all a set needs
            if err.kind() != io::ErrorKind::WouldBlock {
                warn!("notify pipe write failed: {}", err);
            }
        }
    }

    pub fn reset(&self) {
        let mut buf = [0u8; 64];
        loop {
            let rv = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if rv <= 0 {
                break;
            }
        }
    }
}

impl Drop for NotifyPipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
