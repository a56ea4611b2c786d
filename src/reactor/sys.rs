//! Compile time selection of the OS wait primitive.
//!
//! Every backend provides the same surface: a [`Multiplexer`] implementation
//! named `Platform`, a `NotifyPipe` (self-pipe style wakeup that is itself a
//! waitable descriptor), the `RawDescriptor` type and the [`AsDescriptor`]
//! conversion for sockets.
use std::{io, time::Duration};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{NotifyPipe, Platform, RawDescriptor};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{NotifyPipe, Platform, RawDescriptor};

/// Which kind of readiness a descriptor is waited for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Read,
    Write,
}

/// One descriptor handed to the multiplexer; `ready` is filled in by `wait`
#[derive(Debug, Clone, Copy)]
pub struct PollRequest {
    pub descriptor: RawDescriptor,
    pub readiness: Readiness,
    pub ready: bool,
}

impl PollRequest {
    pub fn new(descriptor: RawDescriptor, readiness: Readiness) -> PollRequest {
        PollRequest {
            descriptor,
            readiness,
            ready: false,
        }
    }
}

/// The interface each OS backend implements.
pub trait Multiplexer {
    /// Block until one of the requests is ready or the timeout elapses.
    /// `None` waits forever.  Returns the number of ready descriptors, 0 means
    /// the timeout expired.
    fn wait(requests: &mut [PollRequest], timeout: Option<Duration>) -> io::Result<usize>;

    /// True when a non-blocking connect reported "started, not finished yet".
    fn connect_in_progress(err: &io::Error) -> bool;
}

/// Access to the raw OS descriptor of a socket
pub trait AsDescriptor {
    fn as_descriptor(&self) -> RawDescriptor;
}

/// Convert a relative timeout to whole milliseconds, rounding up so that the
/// wait never returns before the deadline.  `-1` means infinite.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}
