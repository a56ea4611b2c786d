//! Multiplexed waiting over a set of observed events
use super::{
    event::{EventId, OsEvent, TimeoutEvent, WakeupEvent},
    sys::{Multiplexer, Platform, PollRequest, Readiness},
    ReactorError,
};
use log::trace;
use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
    sync::{Arc, Weak},
    time::Duration,
};

/// The subset of observed events that fired during one `wait()`
#[derive(Debug, Default, Clone)]
pub struct SignaledEvents {
    ids: Vec<EventId>,
}

impl SignaledEvents {
    fn clear(&mut self) {
        self.ids.clear();
    }

    fn insert(&mut self, id: EventId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    pub fn contains<E: WakeupEvent + ?Sized>(&self, event: &E) -> bool {
        self.ids.contains(&event.id())
    }

    pub fn contains_id(&self, id: EventId) -> bool {
        self.ids.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Set of events observed by one thread.
///
/// The watcher only keeps weak references: once the owner drops an event it
/// silently disappears from the set.  The buffers used while waiting are
/// kept between calls, a steady set of events waits without allocating.
#[derive(Default)]
pub struct EventWatcher {
    events: BTreeMap<EventId, Weak<dyn WakeupEvent>>,
    live: Vec<Arc<dyn WakeupEvent>>,
    requests: Vec<PollRequest>,
    request_ids: Vec<EventId>,
    timers: Vec<usize>,
}

impl EventWatcher {
    pub fn new() -> EventWatcher {
        EventWatcher::default()
    }

    pub fn observe<E: WakeupEvent + 'static>(&mut self, event: &Arc<E>) {
        let weak: Weak<E> = Arc::downgrade(event);
        let weak: Weak<dyn WakeupEvent> = weak;
        self.events.insert(event.id(), weak);
    }

    pub fn ignore<E: WakeupEvent + ?Sized>(&mut self, event: &E) -> Result<(), ReactorError> {
        match self.events.remove(&event.id()) {
            Some(_) => Ok(()),
            None => Err(ReactorError::NotObserved(event.id())),
        }
    }

    pub fn is_observed<E: WakeupEvent + ?Sized>(&self, event: &E) -> bool {
        self.events.contains_key(&event.id())
    }

    /// Number of observed events that are still alive
    pub fn len(&self) -> usize {
        self.events.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until at least one observed event is signaled.
    ///
    /// Returns exactly the events that are signaled at return time.  If the
    /// wait ended because a deadline passed, the timeout event with the
    /// earliest deadline is always part of the result.
    pub fn wait(&mut self) -> Result<SignaledEvents, ReactorError> {
        let mut signaled = SignaledEvents::default();
        self.wait_into(&mut signaled)?;
        Ok(signaled)
    }

    /// Same as [`wait`](EventWatcher::wait), refilling `signaled` in place
    pub fn wait_into(&mut self, signaled: &mut SignaledEvents) -> Result<(), ReactorError> {
        signaled.clear();
        self.events.retain(|_, w| match w.upgrade() {
            Some(ev) => ev.is_valid(),
            None => false,
        });

        // strong refs stay alive for the duration of the wait only
        self.live
            .extend(self.events.values().filter_map(|w| w.upgrade()));
        let result = self.wait_live(signaled);
        self.live.clear();
        self.requests.clear();
        self.request_ids.clear();
        self.timers.clear();
        result
    }

    fn wait_live(&mut self, signaled: &mut SignaledEvents) -> Result<(), ReactorError> {
        let mut earliest: Option<(Duration, EventId)> = None;
        for (index, ev) in self.live.iter().enumerate() {
            match ev.os_event()? {
                OsEvent::Readable(d) => {
                    self.requests.push(PollRequest::new(d, Readiness::Read));
                    self.request_ids.push(ev.id());
                }
                OsEvent::Writable(d) => {
                    self.requests.push(PollRequest::new(d, Readiness::Write));
                    self.request_ids.push(ev.id());
                }
                OsEvent::Timeout(left) => {
                    if earliest.map_or(true, |(e, _)| left < e) {
                        earliest = Some((left, ev.id()));
                    }
                    self.timers.push(index);
                }
            }
        }
        if self.requests.is_empty() && earliest.is_none() {
            return Err(ReactorError::NothingObserved);
        }

        let timeout = earliest.map(|(left, _)| left);
        trace!(
            "waiting on {} descriptors, timeout {:?}",
            self.requests.len(),
            timeout
        );
        Platform::wait(&mut self.requests, timeout).map_err(ReactorError::Wait)?;

        for (req, id) in self.requests.iter().zip(&self.request_ids) {
            if req.ready {
                signaled.insert(*id);
            }
        }
        for &index in &self.timers {
            let timer = &self.live[index];
            if let OsEvent::Timeout(left) = timer.os_event()? {
                if left.is_zero() {
                    signaled.insert(timer.id());
                }
            }
        }
        if signaled.is_empty() {
            if let Some((_, id)) = earliest {
                signaled.insert(id);
            }
        }
        Ok(())
    }
}

/// An [`EventWatcher`] that always observes one deadline
pub struct TimeoutWatcher {
    watcher: EventWatcher,
    timeout: Arc<TimeoutEvent>,
}

impl TimeoutWatcher {
    pub fn new(timeout: Duration) -> TimeoutWatcher {
        let timeout = Arc::new(TimeoutEvent::new(timeout));
        let mut watcher = EventWatcher::new();
        watcher.observe(&timeout);
        TimeoutWatcher { watcher, timeout }
    }

    pub fn timeout_event(&self) -> &Arc<TimeoutEvent> {
        &self.timeout
    }

    pub fn timed_out(&self, signaled: &SignaledEvents) -> bool {
        signaled.contains(self.timeout.as_ref())
    }
}

impl Deref for TimeoutWatcher {
    type Target = EventWatcher;

    fn deref(&self) -> &EventWatcher {
        &self.watcher
    }
}

impl DerefMut for TimeoutWatcher {
    fn deref_mut(&mut self) -> &mut EventWatcher {
        &mut self.watcher
    }
}

#[cfg(test)]
mod test_watcher {
    use super::*;
    use crate::reactor::{AsyncNotify, SockReadEvent};
    use std::{
        io::Write,
        net::{TcpListener, TcpStream},
        thread,
        time::Instant,
    };

    #[test]
    fn wait_with_nothing_observed_fails() {
        let mut watcher = EventWatcher::new();
        assert!(matches!(watcher.wait(), Err(ReactorError::NothingObserved)));
    }

    #[test]
    fn ignore_requires_observe() {
        let mut watcher = EventWatcher::new();
        let notify = Arc::new(AsyncNotify::new().unwrap());
        assert!(matches!(
            watcher.ignore(notify.as_ref()),
            Err(ReactorError::NotObserved(_))
        ));
        watcher.observe(&notify);
        assert!(watcher.is_observed(notify.as_ref()));
        watcher.ignore(notify.as_ref()).unwrap();
        assert!(!watcher.is_observed(notify.as_ref()));
    }

    #[test]
    fn dropped_event_leaves_the_watcher() {
        let mut watcher = EventWatcher::new();
        let notify = Arc::new(AsyncNotify::new().unwrap());
        watcher.observe(&notify);
        assert_eq!(watcher.len(), 1);
        drop(notify);
        assert_eq!(watcher.len(), 0);
        assert!(matches!(watcher.wait(), Err(ReactorError::NothingObserved)));
    }

    #[test]
    fn notify_from_other_thread_wakes_wait() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (idle, _) = listener.accept().unwrap();
        let readable = Arc::new(SockReadEvent::new(&idle));
        let notify = Arc::new(AsyncNotify::new().unwrap());
        let mut watcher = EventWatcher::new();
        watcher.observe(&readable);
        watcher.observe(&notify);

        let remote = notify.clone();
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.set();
        });
        let signaled = watcher.wait().unwrap();
        setter.join().unwrap();
        assert!(signaled.contains(notify.as_ref()));
        assert!(!signaled.contains(readable.as_ref()));
        assert_eq!(signaled.len(), 1);

        // level triggered: still signaled until reset
        assert!(watcher.wait().unwrap().contains(notify.as_ref()));
        notify.reset();
        peer.write_all(b"x").unwrap();
        let signaled = watcher.wait().unwrap();
        assert!(signaled.contains(readable.as_ref()));
        assert!(!signaled.contains(notify.as_ref()));
    }

    #[test]
    fn timeout_reports_earliest_deadline() {
        let mut watcher = EventWatcher::new();
        let notify = Arc::new(AsyncNotify::new().unwrap());
        let short = Arc::new(TimeoutEvent::new(Duration::from_millis(20)));
        let long = Arc::new(TimeoutEvent::new(Duration::from_secs(10)));
        watcher.observe(&notify);
        watcher.observe(&long);
        watcher.observe(&short);
        let start = Instant::now();
        let signaled = watcher.wait().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(signaled.contains(short.as_ref()));
        assert!(!signaled.contains(long.as_ref()));
        assert!(!signaled.contains(notify.as_ref()));
    }

    #[test]
    fn every_expired_deadline_is_reported() {
        let mut watcher = EventWatcher::new();
        let a = Arc::new(TimeoutEvent::new(Duration::from_millis(5)));
        let b = Arc::new(TimeoutEvent::new(Duration::from_millis(10)));
        watcher.observe(&a);
        watcher.observe(&b);
        thread::sleep(Duration::from_millis(15));
        let signaled = watcher.wait().unwrap();
        assert!(signaled.contains(a.as_ref()));
        assert!(signaled.contains(b.as_ref()));
    }

    #[test]
    fn wait_into_reuses_the_result() {
        let mut watcher = EventWatcher::new();
        let notify = Arc::new(AsyncNotify::new().unwrap());
        let tick = Arc::new(TimeoutEvent::new(Duration::ZERO));
        watcher.observe(&notify);
        watcher.observe(&tick);
        let mut signaled = SignaledEvents::default();
        watcher.wait_into(&mut signaled).unwrap();
        assert!(signaled.contains(tick.as_ref()));

        tick.rearm(Instant::now() + Duration::from_secs(60));
        notify.set();
        watcher.wait_into(&mut signaled).unwrap();
        assert!(signaled.contains(notify.as_ref()));
        assert!(!signaled.contains(tick.as_ref()));
        assert_eq!(signaled.len(), 1);
    }

    #[test]
    fn waiting_does_not_keep_events_alive() {
        let mut watcher = EventWatcher::new();
        let notify = Arc::new(AsyncNotify::new().unwrap());
        notify.set();
        watcher.observe(&notify);
        watcher.wait().unwrap();
        assert_eq!(Arc::strong_count(&notify), 1);
    }

    #[test]
    fn timeout_watcher_times_out() {
        let mut watcher = TimeoutWatcher::new(Duration::from_millis(10));
        let notify = Arc::new(AsyncNotify::new().unwrap());
        watcher.observe(&notify);
        let signaled = watcher.wait().unwrap();
        assert!(watcher.timed_out(&signaled));
    }
}
