// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue

//! # `heap_recv`
//!
//! An asynchronous delivery bridge: it connects a readiness-notified,
//! pull-based producer of discrete "heap" data units to a single-consumer
//! async request/response surface. Callers ask for the next heap and suspend
//! until one arrives - no polling, no busy loop, and no readiness
//! registration while nobody is waiting.
//!
//! ```text
//! HeapSource ──▶ ReaderRegistry ──▶ dispatch loop ──▶ waiter queue ──▶ get().await
//! (try_take)     (readiness fd)     (drain+settle)    (FIFO oneshots)
//! ```
//!
//! The crate deliberately does **not** decode, validate, or store heap
//! payloads - heaps are opaque and only move from source to consumer. Both
//! collaborators are injected:
//!
//! - [`HeapSource`]: non-blocking `try_take` plus a pollable readiness fd.
//!   [`RingHeapSource`] is the in-crate implementation (bounded ring + wake
//!   pipe).
//! - [`ReaderRegistry`]: the host scheduling context's fd-watch capability.
//!   [`MioReactor`] is the in-crate implementation (dedicated epoll/kqueue
//!   thread). There is no implicit global context.
//!
//! # Example
//!
//! ```no_run
//! use heap_recv::{HeapReceiver, MioReactor, RingHeapSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let reactor = Arc::new(MioReactor::spawn()?);
//!     let (producer, source) = RingHeapSource::<Vec<u8>>::bounded(64)?;
//!     let receiver = HeapReceiver::new(source, reactor);
//!
//!     // Producer side (any thread).
//!     std::thread::spawn(move || {
//!         producer.try_push(b"one heap".to_vec()).ok();
//!         producer.stop();
//!     });
//!
//!     // Consumer side: suspend until each heap arrives.
//!     while let Ok(heap) = receiver.get().await {
//!         println!("got {} bytes", heap.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! - **FIFO**: heaps are delivered in strict request order among live
//!   requests; no heap reaches more than one consumer.
//! - **Fast path**: a heap that is already buffered resolves `get()` without
//!   creating a waiter or touching the registry.
//! - **Demand-driven listening**: the readiness registration exists iff at
//!   least one live waiter is queued - verified after every transition.
//! - **Clean termination**: a permanent source stop fails every queued waiter
//!   with the same cause, and later calls keep failing instead of hanging.
//! - **Cancel-safety**: dropping a `get()` future abandons only that slot,
//!   discovered lazily; it never consumes a heap.

// Attach.
pub mod reactor;
pub mod receiver;
pub mod source;

#[cfg(any(test, doc))]
pub mod test_fixtures;

// Re-export.
pub use reactor::*;
pub use receiver::*;
pub use source::*;
