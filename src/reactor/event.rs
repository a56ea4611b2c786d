//! The waitable events understood by [`super::EventWatcher`]
use super::{
    sys::{AsDescriptor, Multiplexer, NotifyPipe, Platform, PollRequest, RawDescriptor, Readiness},
    ReactorError,
};
use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process wide identity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    fn next() -> EventId {
        EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the OS has to wait for to see this event signaled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsEvent {
    Readable(RawDescriptor),
    Writable(RawDescriptor),
    /// relative time left until the deadline, zero once it has passed
    Timeout(Duration),
}

/// One OS level waitable condition.
///
/// Events are shared through `Arc` and may be observed by many watchers on
/// many threads at once.
pub trait WakeupEvent: Send + Sync {
    fn id(&self) -> EventId;

    fn is_valid(&self) -> bool;

    /// The descriptor to wait on.  Fails for an invalidated event.
    fn os_event(&self) -> Result<OsEvent, ReactorError>;

    /// Zero timeout check of this event alone
    fn status(&self) -> Result<bool, ReactorError> {
        poll_now(self.os_event()?)
    }
}

fn poll_now(os_event: OsEvent) -> Result<bool, ReactorError> {
    let request = match os_event {
        OsEvent::Readable(d) => PollRequest::new(d, Readiness::Read),
        OsEvent::Writable(d) => PollRequest::new(d, Readiness::Write),
        OsEvent::Timeout(left) => return Ok(left.is_zero()),
    };
    let mut requests = [request];
    Platform::wait(&mut requests, Some(Duration::ZERO)).map_err(ReactorError::Wait)?;
    Ok(requests[0].ready)
}

struct EventCore {
    id: EventId,
    valid: AtomicBool,
}

impl EventCore {
    fn new() -> EventCore {
        EventCore {
            id: EventId::next(),
            valid: AtomicBool::new(true),
        }
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    fn check(&self) -> Result<(), ReactorError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ReactorError::InvalidEvent(self.id))
        }
    }
}

macro_rules! socket_event {
    ($(#[$doc:meta])* $name:ident, $variant:ident) => {
        $(#[$doc])*
        pub struct $name {
            core: EventCore,
            descriptor: RawDescriptor,
        }

        impl $name {
            pub fn new<S: AsDescriptor>(socket: &S) -> $name {
                $name {
                    core: EventCore::new(),
                    descriptor: socket.as_descriptor(),
                }
            }

            /// Called by the socket owner before the descriptor is closed
            pub(crate) fn invalidate(&self) {
                self.core.invalidate();
            }
        }

        impl WakeupEvent for $name {
            fn id(&self) -> EventId {
                self.core.id
            }

            fn is_valid(&self) -> bool {
                self.core.is_valid()
            }

            fn os_event(&self) -> Result<OsEvent, ReactorError> {
                self.core.check()?;
                Ok(OsEvent::$variant(self.descriptor))
            }
        }
    };
}

socket_event!(
    /// Signaled while a socket has data (or end of stream) to read
    SockReadEvent,
    Readable
);
socket_event!(
    /// Signaled while a socket can take more outgoing data
    SockWriteEvent,
    Writable
);
socket_event!(
    /// Signaled while a listening socket has a pending connection
    SockAcceptEvent,
    Readable
);

/// Fires once an absolute deadline has passed.
///
/// The deadline is kept as an offset from the first one so a periodic
/// caller can [`rearm`](TimeoutEvent::rearm) the same event forever.
pub struct TimeoutEvent {
    core: EventCore,
    origin: Instant,
    offset_nanos: AtomicU64,
}

impl TimeoutEvent {
    pub fn new(timeout: Duration) -> TimeoutEvent {
        TimeoutEvent::at(Instant::now() + timeout)
    }

    pub fn at(deadline: Instant) -> TimeoutEvent {
        TimeoutEvent {
            core: EventCore::new(),
            origin: deadline,
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Move the deadline.  Deadlines before the one given at construction
    /// are clamped to it.
    pub fn rearm(&self, deadline: Instant) {
        let offset = deadline.saturating_duration_since(self.origin).as_nanos();
        self.offset_nanos
            .store(u64::try_from(offset).unwrap_or(u64::MAX), Ordering::Release);
    }

    pub fn deadline(&self) -> Instant {
        self.origin + Duration::from_nanos(self.offset_nanos.load(Ordering::Acquire))
    }

    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

impl WakeupEvent for TimeoutEvent {
    fn id(&self) -> EventId {
        self.core.id
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn os_event(&self) -> Result<OsEvent, ReactorError> {
        self.core.check()?;
        Ok(OsEvent::Timeout(self.remaining()))
    }
}

/// Cross thread wakeup.
///
/// `set()` may be called from any thread and leaves the event signaled for
/// every watcher until a consumer calls `reset()`.
pub struct AsyncNotify {
    core: EventCore,
    pipe: NotifyPipe,
}

impl AsyncNotify {
    pub fn new() -> Result<AsyncNotify, ReactorError> {
        Ok(AsyncNotify {
            core: EventCore::new(),
            pipe: NotifyPipe::new().map_err(ReactorError::Notify)?,
        })
    }

    pub fn set(&self) {
        self.pipe.set();
    }

    pub fn reset(&self) {
        self.pipe.reset();
    }
}

impl WakeupEvent for AsyncNotify {
    fn id(&self) -> EventId {
        self.core.id
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn os_event(&self) -> Result<OsEvent, ReactorError> {
        self.core.check()?;
        Ok(OsEvent::Readable(self.pipe.read_descriptor()))
    }
}

#[cfg(test)]
mod test_event {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn ids_are_unique() {
        let a = TimeoutEvent::new(Duration::ZERO);
        let b = TimeoutEvent::new(Duration::ZERO);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn notify_is_level_triggered() {
        let notify = AsyncNotify::new().unwrap();
        assert!(!notify.status().unwrap());
        notify.set();
        assert!(notify.status().unwrap());
        // still set until someone resets it
        assert!(notify.status().unwrap());
        notify.reset();
        assert!(!notify.status().unwrap());
    }

    #[test]
    fn timeout_status_follows_deadline() {
        let t = TimeoutEvent::new(Duration::from_millis(30));
        assert!(!t.status().unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(t.status().unwrap());
        assert!(t.expired());
    }

    #[test]
    fn rearm_moves_the_deadline() {
        let start = Instant::now();
        let t = TimeoutEvent::at(start);
        assert!(t.expired());
        t.rearm(start + Duration::from_secs(60));
        assert!(!t.status().unwrap());
        assert_eq!(t.deadline(), start + Duration::from_secs(60));
        // never earlier than the first deadline
        t.rearm(start - Duration::from_millis(1));
        assert_eq!(t.deadline(), start);
        assert!(t.status().unwrap());
    }

    #[test]
    fn invalid_event_has_no_descriptor() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ev = SockAcceptEvent::new(&listener);
        assert!(ev.os_event().is_ok());
        ev.invalidate();
        assert!(!ev.is_valid());
        match ev.os_event() {
            Err(ReactorError::InvalidEvent(id)) => assert_eq!(id, ev.id()),
            other => panic!("expected invalid event error, got {:?}", other),
        }
    }

    #[test]
    fn accept_event_fires_on_pending_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ev = SockAcceptEvent::new(&listener);
        assert!(!ev.status().unwrap());
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(ev.status().unwrap());
    }
}
