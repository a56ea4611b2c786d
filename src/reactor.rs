//! Portable event reactor used by the control channel.
//!
//! A [`WakeupEvent`] is one waitable condition: a socket that became readable
//! or writable, a listening socket with a pending connection, a deadline, or a
//! cross-thread notification ([`AsyncNotify`]).  An [`EventWatcher`] collects
//! any number of these and blocks in a single multiplexed system call until
//! at least one of them fires.  Because the notification events are
//! descriptors themselves, one `wait()` covers socket traffic and requests
//! coming from other threads at the same time.
//!
//! The platform specific part lives in [`sys`] and is picked at compile time.
use thiserror::Error;

pub mod event;
pub mod sys;
pub mod watcher;

pub use event::{
    AsyncNotify, EventId, OsEvent, SockAcceptEvent, SockReadEvent, SockWriteEvent, TimeoutEvent,
    WakeupEvent,
};
pub use sys::RawDescriptor;
pub use watcher::{EventWatcher, SignaledEvents, TimeoutWatcher};

/// Errors raised by the reactor primitives
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("cannot serve request for invalid event {0}")]
    InvalidEvent(EventId),
    #[error("event {0} must have been observed prior to being ignored")]
    NotObserved(EventId),
    #[error("wait called on a watcher that observes no valid events")]
    NothingObserved,
    #[error("creating notification pipe failed: {0}")]
    Notify(#[source] std::io::Error),
    #[error("multiplexed wait failed: {0}")]
    Wait(#[source] std::io::Error),
}
