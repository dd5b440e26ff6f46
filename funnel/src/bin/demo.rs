//! Sequential walk-through of the queue.
//!
//! Usage:
//!     cargo run --bin demo
//!
//! Enqueues three values, then dequeues four times; the last call finds the
//! queue empty.

use funnel::mpsc::Queue;

fn main() {
    funnel::init_tracing();

    let queue = Queue::new();

    queue.enqueue(1);
    queue.enqueue(2);
    queue.enqueue(3);

    for _ in 0..4 {
        println!("Dequeued: {:?}", queue.dequeue());
    }
}
