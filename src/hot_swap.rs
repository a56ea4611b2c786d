//! Lock free hand-off of plugin configurations from the control thread to
//! the audio thread.
//!
//! The writer appends every new configuration to the tail of a forward only
//! list.  The reader, once per audio block, walks from its current node to
//! the tail, adopts the tail's configuration, and flags every node it left
//! behind as retired.  Only the writer frees nodes, only from the head, and
//! only retired ones, so the reader never touches freed memory and neither
//! side ever waits for the other.
//!
//! ```
//! use rtmha::hot_swap;
//!
//! let (mut writer, mut reader) = hot_swap::channel::<f32>();
//! writer.push_config(0.5);
//! writer.push_config(0.25);
//! assert_eq!(*reader.poll_config().unwrap(), 0.25);
//! ```
use std::{
    marker::PhantomData,
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicPtr, Ordering},
        Arc,
    },
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HotSwapError {
    #[error("no configuration has been pushed yet")]
    NoConfiguration,
}

struct Node<T> {
    data: Option<T>,
    next: AtomicPtr<Node<T>>,
    retired: AtomicBool,
}

impl<T> Node<T> {
    fn alloc(data: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            data,
            next: AtomicPtr::new(ptr::null_mut()),
            retired: AtomicBool::new(false),
        }))
    }
}

struct Chain<T> {
    head: AtomicPtr<Node<T>>,
    // the chain hands out &T on two threads and drops T on the writer's
    _owns: PhantomData<T>,
}

impl<T> Drop for Chain<T> {
    fn drop(&mut self) {
        // both handles are gone, nobody else can reach the nodes
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Acquire);
        }
    }
}

/// Create the two ends of a configuration chain.
///
/// The chain starts with a sentinel node that carries no configuration.
pub fn channel<T: Send + Sync>() -> (ConfigWriter<T>, ConfigReader<T>) {
    let sentinel = Node::alloc(None);
    let chain = Arc::new(Chain {
        head: AtomicPtr::new(sentinel),
        _owns: PhantomData,
    });
    (
        ConfigWriter {
            chain: chain.clone(),
            tail: sentinel,
        },
        ConfigReader {
            chain,
            cursor: sentinel,
        },
    )
}

/// Free every node of the chain, including the current configuration.
pub fn remove_all_cfg<T>(writer: ConfigWriter<T>, reader: ConfigReader<T>) {
    drop(reader);
    drop(writer);
}

/// The control thread's end: appends and reclaims
pub struct ConfigWriter<T> {
    chain: Arc<Chain<T>>,
    tail: *mut Node<T>,
}

// SAFETY: `tail` is only dereferenced through &mut self or &self of the one
// writer, and the node it points to is never freed while it is the tail.
unsafe impl<T: Send + Sync> Send for ConfigWriter<T> {}

impl<T> ConfigWriter<T> {
    /// Append a new configuration at the tail, then reclaim retired nodes.
    pub fn push_config(&mut self, cfg: T) {
        let node = Node::alloc(Some(cfg));
        unsafe { (*self.tail).next.store(node, Ordering::Release) };
        self.tail = node;
        self.cleanup_unused_cfg();
    }

    /// Free every node at the head that the reader has retired.  The tail is
    /// never freed.  Returns the number of freed nodes.
    pub fn cleanup_unused_cfg(&mut self) -> usize {
        let mut freed = 0;
        loop {
            let head = self.chain.head.load(Ordering::Acquire);
            // SAFETY: the head is only ever freed here, by the writer
            let (next, retired) = unsafe {
                (
                    (*head).next.load(Ordering::Acquire),
                    (*head).retired.load(Ordering::Acquire),
                )
            };
            if next.is_null() || !retired {
                break;
            }
            self.chain.head.store(next, Ordering::Release);
            // SAFETY: retired means the reader has moved past and will not come back
            drop(unsafe { Box::from_raw(head) });
            freed += 1;
        }
        freed
    }

    /// The most recently pushed configuration, `None` before the first push
    pub fn peek_config(&self) -> Option<&T> {
        unsafe { (*self.tail).data.as_ref() }
    }

    /// Number of live nodes, the sentinel included while it is alive
    pub fn chain_len(&self) -> usize {
        let mut len = 0;
        let mut node = self.chain.head.load(Ordering::Acquire);
        while !node.is_null() {
            len += 1;
            node = unsafe { (*node).next.load(Ordering::Acquire) };
        }
        len
    }
}

/// The audio thread's end: adopts the newest configuration
pub struct ConfigReader<T> {
    chain: Arc<Chain<T>>,
    cursor: *mut Node<T>,
}

// SAFETY: the node under `cursor` is never retired, so the writer never frees it
unsafe impl<T: Send + Sync> Send for ConfigReader<T> {}

impl<T> ConfigReader<T> {
    fn tail_from_cursor(&self, retire: bool) -> *mut Node<T> {
        let mut node = self.cursor;
        loop {
            let next = unsafe { (*node).next.load(Ordering::Acquire) };
            if next.is_null() {
                return node;
            }
            if retire {
                // next is read first; after this store `node` may be freed at any time
                unsafe { (*node).retired.store(true, Ordering::Release) };
            }
            node = next;
        }
    }

    /// Adopt the newest configuration and retire everything before it.
    ///
    /// The returned reference stays valid until the next poll.
    pub fn poll_config(&mut self) -> Result<&T, HotSwapError> {
        self.cursor = self.tail_from_cursor(true);
        unsafe { (*self.cursor).data.as_ref() }.ok_or(HotSwapError::NoConfiguration)
    }

    /// Look at the newest configuration without retiring anything
    pub fn peek_config(&self) -> Option<&T> {
        let tail = self.tail_from_cursor(false);
        unsafe { (*tail).data.as_ref() }
    }

    /// Whether the writer end is still around
    pub fn writer_alive(&self) -> bool {
        Arc::strong_count(&self.chain) > 1
    }
}

#[cfg(test)]
mod test_hot_swap {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Tracked {
        value: usize,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn poll_before_push_fails() {
        let (_writer, mut reader) = channel::<u32>();
        assert_eq!(reader.poll_config(), Err(HotSwapError::NoConfiguration));
    }

    #[test]
    fn empty_peek_does_not_fail() {
        let (writer, reader) = channel::<u32>();
        assert_eq!(reader.peek_config(), None);
        assert_eq!(writer.peek_config(), None);
    }

    #[test]
    fn adopts_last_pushed() {
        let (mut writer, mut reader) = channel();
        for i in 1..=5 {
            writer.push_config(i);
        }
        assert_eq!(*reader.poll_config().unwrap(), 5);
        // nothing new, stays on the same configuration
        assert_eq!(*reader.poll_config().unwrap(), 5);
        writer.push_config(6);
        assert_eq!(*reader.poll_config().unwrap(), 6);
    }

    #[test]
    fn peek_sees_latest_without_retiring() {
        let (mut writer, mut reader) = channel();
        writer.push_config("a");
        writer.push_config("b");
        assert_eq!(reader.peek_config(), Some(&"b"));
        assert_eq!(writer.peek_config(), Some(&"b"));
        assert_eq!(writer.cleanup_unused_cfg(), 0);
        assert_eq!(writer.chain_len(), 3);
        assert_eq!(*reader.poll_config().unwrap(), "b");
    }

    #[test]
    fn reclaims_exactly_what_the_reader_passed() {
        let (mut writer, mut reader) = channel();
        writer.push_config(1);
        writer.push_config(2);
        writer.push_config(3);
        assert_eq!(writer.chain_len(), 4);
        assert_eq!(*reader.poll_config().unwrap(), 3);
        // sentinel, 1 and 2 were passed
        assert_eq!(writer.cleanup_unused_cfg(), 3);
        assert_eq!(writer.chain_len(), 1);
        assert_eq!(writer.cleanup_unused_cfg(), 0);

        writer.push_config(4);
        writer.push_config(5);
        assert_eq!(writer.chain_len(), 3);
        assert_eq!(*reader.poll_config().unwrap(), 5);
        // push reclaims on its own
        writer.push_config(6);
        assert_eq!(writer.chain_len(), 2);
    }

    #[test]
    fn current_config_survives_cleanup() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut writer, mut reader) = channel();
        writer.push_config(Tracked { value: 7, drops: drops.clone() });
        let adopted = reader.poll_config().unwrap().value;
        writer.cleanup_unused_cfg();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(adopted, 7);
        assert_eq!(reader.poll_config().unwrap().value, 7);
    }

    #[test]
    fn remove_all_frees_everything() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut writer, mut reader) = channel();
        for value in 0..10 {
            writer.push_config(Tracked { value, drops: drops.clone() });
            if value == 4 {
                reader.poll_config().unwrap();
            }
        }
        remove_all_cfg(writer, reader);
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn dropping_writer_keeps_reader_usable() {
        let (mut writer, mut reader) = channel();
        writer.push_config(1.5f32);
        assert!(reader.writer_alive());
        drop(writer);
        assert!(!reader.writer_alive());
        assert_eq!(*reader.poll_config().unwrap(), 1.5);
    }
}
