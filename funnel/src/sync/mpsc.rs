//! Lock-free MPSC queue for in-process (inter-thread) communication.
//!
//! An unbounded queue built on a heap-allocated linked list with atomic pointers.
//!
//! # Overview
//!
//! - [`Producer`] - Write end (clone it for as many producers as needed)
//! - [`Consumer`] - Read end (exactly one per queue)
//! - Lock-free: no mutexes or syscalls in the hot path
//!
//! # Example
//!
//! ```
//! use funnel::sync::mpsc;
//!
//! let (producer, consumer) = mpsc::channel::<u64>();
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|id| {
//!         let producer = producer.clone();
//!         std::thread::spawn(move || producer.push(id))
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! let mut received: Vec<u64> = consumer.try_iter().collect();
//! received.sort_unstable();
//! assert_eq!(received, vec![0, 1, 2, 3]);
//! ```
//!
//! # Single consumer
//!
//! [`Consumer`] is [`Send`] but neither [`Sync`] nor [`Clone`], so only one
//! thread can ever pop from a given queue:
//!
//! ```compile_fail
//! use funnel::sync::mpsc;
//!
//! let (_producer, consumer) = mpsc::channel::<u64>();
//! let second = consumer.clone();
//! ```
//!
//! ```compile_fail
//! use funnel::sync::mpsc::Consumer;
//!
//! fn assert_sync<T: Sync>() {}
//! assert_sync::<Consumer<u64>>();
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::mpsc::Queue;
use crate::trace::debug;

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the MPSC queue.
///
/// Cheap to clone; every clone pushes into the same queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] and [`Sync`]:
/// - Can transfer ownership to another thread
/// - Can share `&Producer` between threads (concurrent `push()` is allowed)
pub struct Producer<T: Send> {
    queue: Arc<Queue<T>>,
}

/// Read end of the MPSC queue.
///
/// # Thread Safety
///
/// `Consumer` is [`Send`] but **not** [`Sync`] or [`Clone`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Consumer` (no concurrent `pop()`)
pub struct Consumer<T: Send> {
    queue: Arc<Queue<T>>,
    _unsync: PhantomUnsync,
}

/// Creates a new unbounded MPSC channel.
///
/// Returns a `(Producer, Consumer)` pair backed by one shared [`Queue`].
///
/// # Example
///
/// ```
/// use funnel::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel::<String>();
///
/// tx.push("hello".to_string());
/// assert_eq!(rx.pop(), Some("hello".to_string()));
/// ```
#[must_use]
pub fn channel<T: Send>() -> (Producer<T>, Consumer<T>) {
    let queue = Arc::new(Queue::new());
    debug!("created mpsc channel");

    let producer = Producer {
        queue: Arc::clone(&queue),
    };

    let consumer = Consumer {
        queue,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

impl<T: Send> Producer<T> {
    /// Pushes an item onto the queue (lock-free, never fails).
    #[inline]
    pub fn push(&self, item: T) {
        self.queue.enqueue(item);
    }
}

impl<T: Send> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop the oldest item from the queue (lock-free).
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        self.queue.dequeue()
    }

    /// Returns `true` if nothing is queued right now.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns an iterator that pops items until the queue is observed empty.
    ///
    /// Items pushed after the iterator returns `None` are left for the next call.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { consumer: self }
    }
}

impl<T: Send> Drop for Consumer<T> {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            debug!(
                producers = Arc::strong_count(&self.queue) - 1,
                "consumer dropped with items still queued"
            );
        }
    }
}

/// Draining iterator returned by [`Consumer::try_iter`].
pub struct TryIter<'a, T: Send> {
    consumer: &'a Consumer<T>,
}

impl<T: Send> Iterator for TryIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.consumer.pop()
    }
}
