//! Core lock-free MPSC linked-list queue algorithm.
//!
//! This module provides an unbounded lock-free MPSC (Multi-Producer Single-Consumer)
//! queue built on a singly-linked chain of heap nodes.
//!
//! # Algorithm
//!
//! The algorithm is the Michael-Scott queue, restricted to a single consumer:
//!
//! - The chain always starts with a sentinel node whose payload is absent
//! - `head` points at the sentinel, `tail` at the last node or a node behind it
//! - Producers link a new node by CAS-ing the last node's `next` from null
//! - Whoever sees a lagging `tail` (a `tail` whose `next` is set) moves it forward
//! - The consumer moves `head` onto the first real node and takes its payload,
//!   turning that node into the new sentinel
//!
//! # Reclamation
//!
//! Every operation pins the current thread with `crossbeam-epoch`. A sentinel that
//! the consumer moves past is handed to [`Guard::defer_destroy`], so it is freed
//! only after every thread that might still hold a snapshot of it has unpinned.
//! Node addresses are therefore never reused while a stale CAS could match them.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};

use crate::trace::{trace, warn};

/// A cell in the linked chain.
struct Node<T> {
    /// Payload, `None` once the node has become the sentinel.
    ///
    /// Written by the producer before the node is linked, taken by the consumer
    /// that wins the head CAS onto this node. No other access happens.
    value: UnsafeCell<Option<T>>,

    /// Forward link. Goes from null to a successor at most once.
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> Self {
        Self {
            value: UnsafeCell::new(None),
            next: Atomic::null(),
        }
    }

    fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(Some(value)),
            next: Atomic::null(),
        }
    }
}

/// Unbounded lock-free queue for many producers and one consumer.
///
/// [`enqueue`](Self::enqueue) may be called from any number of threads at once.
/// [`dequeue`](Self::dequeue) must only be called by one thread at a time; use
/// [`crate::sync::mpsc::channel`] to have the compiler enforce this.
///
/// # Example
///
/// ```
/// use funnel::mpsc::Queue;
///
/// let queue = Queue::new();
/// queue.enqueue(1);
/// queue.enqueue(2);
///
/// assert_eq!(queue.dequeue(), Some(1));
/// assert_eq!(queue.dequeue(), Some(2));
/// assert_eq!(queue.dequeue(), None);
/// ```
pub struct Queue<T> {
    /// Current sentinel. Only the consumer moves it.
    head: CachePadded<Atomic<Node<T>>>,

    /// Last linked node, or a node behind it while lagging.
    tail: CachePadded<Atomic<Node<T>>>,
}

impl<T> Queue<T> {
    /// Creates an empty queue holding only the sentinel node.
    #[must_use]
    pub fn new() -> Self {
        // SAFETY: The queue is not shared yet, so no other thread can observe
        // the sentinel and no guard is needed to keep it alive.
        let sentinel = Owned::new(Node::sentinel()).into_shared(unsafe { epoch::unprotected() });

        Self {
            head: CachePadded::new(Atomic::from(sentinel)),
            tail: CachePadded::new(Atomic::from(sentinel)),
        }
    }

    /// Appends `value` at the end of the queue.
    ///
    /// Lock-free and infallible. The position of `value` is decided by the order
    /// in which concurrent producers win their link CAS, not by call order.
    pub fn enqueue(&self, value: T) {
        let guard = &epoch::pin();
        let backoff = Backoff::new();
        let mut node = Owned::new(Node::new(value));

        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: tail is never null, and the guard keeps the node alive even
            // if the consumer retires it after this load.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            // Stale snapshot: another thread moved tail between the two loads.
            if tail != self.tail.load(Ordering::Acquire, guard) {
                continue;
            }

            if next.is_null() {
                match tail_ref.next.compare_exchange(
                    Shared::null(),
                    node,
                    Ordering::Release,
                    Ordering::Relaxed,
                    guard,
                ) {
                    Ok(linked) => {
                        // Failure means someone already helped tail forward.
                        let _ = self.tail.compare_exchange(
                            tail,
                            linked,
                            Ordering::Release,
                            Ordering::Relaxed,
                            guard,
                        );
                        return;
                    }
                    Err(err) => {
                        // Another producer linked first; retry with our node.
                        node = err.new;
                        backoff.spin();
                    }
                }
            } else {
                trace!("enqueue: advancing lagging tail");
                self.help_tail(tail, next, guard);
            }
        }
    }

    /// Removes and returns the oldest value, or `None` if the queue is empty.
    ///
    /// Must be called by a single consumer at a time. Concurrent callers do not
    /// corrupt the chain or duplicate values (the losing head CAS retries), but
    /// they lose the FIFO hand-off guarantees this type is built around.
    pub fn dequeue(&self) -> Option<T> {
        let guard = &epoch::pin();

        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: head is never null and the guard keeps it alive.
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);

            if head == tail {
                if next.is_null() {
                    return None;
                }
                trace!("dequeue: advancing lagging tail");
                self.help_tail(tail, next, guard);
                continue;
            }

            // SAFETY: The guard keeps `next` alive. It can only be null here if
            // another consumer raced us, in which case we take a fresh snapshot.
            let Some(next_ref) = (unsafe { next.as_ref() }) else {
                continue;
            };

            match self.head.compare_exchange(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    // SAFETY: Winning the head CAS onto `next` makes this thread the
                    // only one allowed to touch its payload. The producer's write
                    // happened before the Release link CAS we acquired above.
                    let value = unsafe { (*next_ref.value.get()).take() };

                    // SAFETY: The old sentinel is unreachable from head, and tail
                    // was observed past it and never moves backwards. Threads still
                    // holding a snapshot are pinned, so destruction is deferred.
                    unsafe { guard.defer_destroy(head) };

                    return value;
                }
                Err(_) => {
                    warn!("dequeue: head moved concurrently, more than one consumer is active");
                }
            }
        }
    }

    /// Returns `true` if no value is linked after the sentinel.
    ///
    /// This is a snapshot. Producers may link a value right after it is taken,
    /// so only a `false` result is stable, and only for the consumer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // SAFETY: head is never null and the guard keeps it alive.
        unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .is_null()
    }

    /// Moves tail from a lagging snapshot to its successor.
    ///
    /// Losing this CAS is fine: it means another thread already advanced tail.
    #[inline]
    fn help_tail<'g>(&self, tail: Shared<'g, Node<T>>, next: Shared<'g, Node<T>>, guard: &'g Guard) {
        let _ = self
            .tail
            .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("is_empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no other thread can reach the chain, so it
        // is freed eagerly. Nodes retired earlier are owned by the collector and
        // are no longer linked from head.
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            while !node.is_null() {
                let next = node.deref().next.load(Ordering::Relaxed, guard);
                drop(node.into_owned());
                node = next;
            }
        }
    }
}

// SAFETY: Queue is Send because it only owns `T` values and heap nodes.
unsafe impl<T: Send> Send for Queue<T> {}

// SAFETY: Queue is Sync because all shared state is mediated by atomics:
// - head/tail/next are epoch-protected atomic pointers updated by CAS
// - A payload is written before its node is published (Release) and taken only
//   by the thread that wins the head CAS onto that node (AcqRel)
unsafe impl<T: Send> Sync for Queue<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Links `value` after the current tail without moving tail, leaving it lagging.
    fn link_behind_tail(queue: &Queue<u64>, value: u64) {
        let guard = &epoch::pin();
        let tail = queue.tail.load(Ordering::Acquire, guard);
        let node = Owned::new(Node::new(value));
        unsafe { tail.deref() }.next.store(node, Ordering::Release);
    }

    fn tail_is_last(queue: &Queue<u64>) -> bool {
        let guard = &epoch::pin();
        let tail = queue.tail.load(Ordering::Acquire, guard);
        unsafe { tail.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .is_null()
    }

    #[test]
    fn test_empty_on_construction() {
        let queue: Queue<u64> = Queue::new();

        assert!(queue.is_empty());
        for _ in 0..3 {
            assert_eq!(queue.dequeue(), None);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sequential_fifo() {
        let queue = Queue::new();

        queue.enqueue(10);
        queue.enqueue(20);
        queue.enqueue(30);
        assert!(!queue.is_empty());

        assert_eq!(queue.dequeue(), Some(10));
        assert_eq!(queue.dequeue(), Some(20));
        assert_eq!(queue.dequeue(), Some(30));
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_interleaved_operations() {
        let queue = Queue::new();

        queue.enqueue(1);
        assert_eq!(queue.dequeue(), Some(1));
        queue.enqueue(2);
        assert_eq!(queue.dequeue(), Some(2));
        queue.enqueue(3);
        queue.enqueue(4);
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), Some(4));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_consistency_across_refills() {
        let queue = Queue::new();

        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(queue.dequeue(), Some(1));
        queue.enqueue(3);
        assert_eq!(queue.dequeue(), Some(2));
        queue.enqueue(4);
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), Some(4));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_bulk_in_order() {
        let queue = Queue::new();

        for i in 1..=1000u32 {
            queue.enqueue(i);
        }
        for i in 1..=1000u32 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_empty_until_next_enqueue() {
        let queue = Queue::new();

        queue.enqueue(7u8);
        assert_eq!(queue.dequeue(), Some(7));
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.dequeue(), None);

        queue.enqueue(8);
        assert_eq!(queue.dequeue(), Some(8));
    }

    #[test]
    fn test_option_payload_is_not_empty() {
        let queue: Queue<Option<u32>> = Queue::new();

        queue.enqueue(None);
        queue.enqueue(Some(5));

        assert_eq!(queue.dequeue(), Some(None));
        assert_eq!(queue.dequeue(), Some(Some(5)));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_dequeue_helps_lagging_tail() {
        let queue = Queue::new();

        link_behind_tail(&queue, 1);
        assert!(!tail_is_last(&queue));

        assert_eq!(queue.dequeue(), Some(1));
        assert!(tail_is_last(&queue));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_enqueue_helps_lagging_tail() {
        let queue = Queue::new();

        queue.enqueue(1);
        link_behind_tail(&queue, 2);
        assert!(!tail_is_last(&queue));

        queue.enqueue(3);
        assert!(tail_is_last(&queue));

        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_drop_releases_pending_values() {
        struct Counted(Arc<AtomicUsize>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let queue = Queue::new();
        for _ in 0..5 {
            queue.enqueue(Counted(Arc::clone(&drops)));
        }

        drop(queue.dequeue());
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        drop(queue);
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_multiple_producers() {
        let queue: Arc<Queue<u64>> = Arc::new(Queue::new());
        let num_producers = 4;
        let items_per_producer = 1000;

        let handles: Vec<_> = (0..num_producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..items_per_producer {
                        queue.enqueue(p * 10_000 + i);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let mut items = Vec::new();
        while let Some(item) = queue.dequeue() {
            items.push(item);
        }

        assert_eq!(items.len() as u64, num_producers * items_per_producer);

        items.sort_unstable();
        let expected: Vec<u64> = (0..num_producers)
            .flat_map(|p| (0..items_per_producer).map(move |i| p * 10_000 + i))
            .collect();
        assert_eq!(items, expected);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let queue: Arc<Queue<u64>> = Arc::new(Queue::new());
        let num_items = 10_000u64;

        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..num_items {
                producer_queue.enqueue(i);
            }
        });

        let consumer_queue = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            let mut expected = 0u64;
            while expected < num_items {
                match consumer_queue.dequeue() {
                    Some(item) => {
                        assert_eq!(item, expected);
                        expected += 1;
                    }
                    None => thread::yield_now(),
                }
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
        assert!(queue.is_empty());
    }
}
