//! Core MPSC (Multi-Producer Single-Consumer) queue primitives.
//!
//! This module contains an unbounded lock-free MPSC linked-list algorithm.
//! Any number of producers can enqueue concurrently; one consumer dequeues.
//!
//! Used by:
//! - [`crate::sync::mpsc`] - Typed producer/consumer handles for threads

pub mod list;

pub use list::Queue;
