//! Detached worker thread with a completion event.
//!
//! The thread function's result, including an error or a panic, is kept and
//! handed out through [`Thread::take_result`] once the thread finished.  The
//! completion is announced through an [`AsyncNotify`] so it can be waited on
//! together with sockets in one [`EventWatcher`].
use crate::{
    common::box_error::BoxError,
    reactor::{AsyncNotify, EventWatcher, ReactorError},
};
use log::{debug, error, warn};
use simple_error::SimpleError;
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard},
    thread,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Prepared,
    Running,
    Finished,
}

struct Shared<T> {
    state: Mutex<ThreadState>,
    result: Mutex<Option<Result<T, BoxError>>>,
    finished: Arc<AsyncNotify>,
}

fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    // a panic inside the thread function never holds these locks
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Thread<T> {
    name: String,
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Thread<T> {
    /// Start `func` on a new named OS thread right away.
    pub fn spawn<F>(name: &str, func: F) -> Result<Thread<T>, BoxError>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(ThreadState::Prepared),
            result: Mutex::new(None),
            finished: Arc::new(AsyncNotify::new()?),
        });
        let worker = shared.clone();
        let thread_name = name.to_string();
        *lock(&shared.state) = ThreadState::Running;
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let outcome = match catch_unwind(AssertUnwindSafe(func)) {
                    Ok(r) => r,
                    Err(payload) => {
                        let msg = panic_message(payload);
                        error!("thread {} panicked: {}", thread_name, msg);
                        Err(Box::new(SimpleError::new(format!("panic: {}", msg))) as BoxError)
                    }
                };
                if let Err(e) = &outcome {
                    debug!("thread {} ended with error: {}", thread_name, e);
                }
                *lock(&worker.result) = Some(outcome);
                *lock(&worker.state) = ThreadState::Finished;
                worker.finished.set();
            });
        if let Err(e) = spawned {
            *lock(&shared.state) = ThreadState::Prepared;
            return Err(e.into());
        }
        Ok(Thread {
            name: name.to_string(),
            shared,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        *lock(&self.shared.state)
    }

    /// Signaled once, when the thread function returned or panicked
    pub fn finish_event(&self) -> &Arc<AsyncNotify> {
        &self.shared.finished
    }

    /// Block until the thread finished
    pub fn wait(&self) -> Result<(), ReactorError> {
        let mut watcher = EventWatcher::new();
        watcher.observe(&self.shared.finished);
        while self.state() != ThreadState::Finished {
            watcher.wait()?;
        }
        Ok(())
    }

    /// The function's outcome.  `None` until finished or when already taken.
    pub fn take_result(&self) -> Option<Result<T, BoxError>> {
        if self.state() != ThreadState::Finished {
            return None;
        }
        lock(&self.shared.result).take()
    }
}

impl<T> Drop for Thread<T> {
    fn drop(&mut self) {
        if *lock(&self.shared.state) == ThreadState::Running {
            warn!("thread {} dropped while still running, leaving it detached", self.name);
        }
    }
}

#[cfg(test)]
mod test_thread {
    use super::*;
    use crate::reactor::WakeupEvent;
    use simple_error::bail;
    use std::time::Duration;

    #[test]
    fn result_is_available_after_finish() {
        let t = Thread::spawn("adder", || Ok(40 + 2)).unwrap();
        t.wait().unwrap();
        assert_eq!(t.state(), ThreadState::Finished);
        assert!(t.finish_event().status().is_ok());
        assert_eq!(t.take_result().unwrap().unwrap(), 42);
        // only handed out once
        assert!(t.take_result().is_none());
    }

    #[test]
    fn running_thread_has_no_result() {
        let gate = Arc::new(AsyncNotify::new().unwrap());
        let remote = gate.clone();
        let t = Thread::spawn("gated", move || {
            let mut watcher = EventWatcher::new();
            watcher.observe(&remote);
            watcher.wait()?;
            Ok("done")
        })
        .unwrap();
        assert_eq!(t.state(), ThreadState::Running);
        assert!(t.take_result().is_none());
        gate.set();
        t.wait().unwrap();
        assert_eq!(t.take_result().unwrap().unwrap(), "done");
    }

    #[test]
    fn errors_are_captured() {
        let t: Thread<()> = Thread::spawn("failing", || { bail!("no can do") }).unwrap();
        t.wait().unwrap();
        let err = t.take_result().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "no can do");
    }

    #[test]
    fn panics_are_captured() {
        let t: Thread<()> = Thread::spawn("panicking", || panic!("boom")).unwrap();
        t.wait().unwrap();
        let err = t.take_result().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "panic: boom");
    }

    #[test]
    fn thread_carries_its_name() {
        let t = Thread::spawn("named", || Ok(thread::current().name().map(String::from))).unwrap();
        t.wait().unwrap();
        assert_eq!(t.name(), "named");
        assert_eq!(t.take_result().unwrap().unwrap(), Some("named".to_string()));
    }

    #[test]
    fn dropping_running_thread_detaches() {
        let t = Thread::spawn("sleeper", || {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        })
        .unwrap();
        let done = t.finish_event().clone();
        drop(t);
        let mut watcher = EventWatcher::new();
        watcher.observe(&done);
        assert!(watcher.wait().unwrap().contains(done.as_ref()));
    }
}
