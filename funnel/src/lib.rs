//! Lock-free unbounded queue for many producer threads and one consumer thread.
//!
//! - [`mpsc::Queue`] - The core linked-list queue (`enqueue` / `dequeue`)
//! - [`sync::mpsc`] - `(Producer, Consumer)` handles that enforce the single consumer
//!
//! Enable the `tracing` feature and call [`init_tracing`] to see queue events.

pub mod mpsc;
pub mod sync;

mod trace;

pub use trace::init_tracing;
