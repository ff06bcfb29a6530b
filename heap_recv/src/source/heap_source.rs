// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The [`HeapSource`] boundary trait and its [`TryTake`] outcome type.
//!
//! A heap source is the pull side of the bridge: something that assembles
//! discrete "heap" data units and hands them out through a non-blocking take,
//! announcing *possible* availability through a pollable file descriptor. The
//! bridge ([`HeapReceiver`]) neither decodes nor buffers heaps; it only moves
//! them from a source to whichever consumer asked first.
//!
//! [`HeapReceiver`]: crate::HeapReceiver

use super::errors::StopCause;
use std::os::fd::RawFd;

/// Outcome of a single non-blocking take from a [`HeapSource`].
///
/// A tagged result rather than nested `Result`/`Option`, because all three
/// outcomes are ordinary protocol states, not failures of the call itself:
///
/// | Variant     | Meaning                                       | Bridge reaction            |
/// | :---------- | :-------------------------------------------- | :------------------------- |
/// | [`Heap`]    | A completed heap was obtainable               | Deliver to oldest waiter   |
/// | [`Empty`]   | Nothing obtainable right now (benign)         | Absorb; keep listening     |
/// | [`Stopped`] | The source will never produce again           | Fan the cause out; latch   |
///
/// [`Empty`]: TryTake::Empty
/// [`Heap`]: TryTake::Heap
/// [`Stopped`]: TryTake::Stopped
#[derive(Debug)]
pub enum TryTake<H> {
    /// A completed heap.
    Heap(H),
    /// Nothing available yet. The readiness signal is allowed to fire for
    /// heaps that turn out incomplete, so this is not an error.
    Empty,
    /// Terminal: no heap will ever be produced again. Repeated takes keep
    /// reporting this with the same cause.
    Stopped(StopCause),
}

/// A readiness-notified, pull-based producer of heaps.
///
/// Implementations must uphold two contracts the bridge depends on:
///
/// 1. [`try_take()`] is non-blocking and safe to call repeatedly, including
///    after it has reported [`TryTake::Stopped`] (the stop must be sticky).
/// 2. [`readiness_fd()`] is a pollable handle that becomes readable when a
///    heap *may* be obtainable. Spurious readiness is fine; silent readiness
///    (data obtainable but fd never readable) is not.
///
/// See [`RingHeapSource`] for the in-crate implementation backed by a bounded
/// ring and a wake-byte pipe.
///
/// [`RingHeapSource`]: super::ring_source::RingHeapSource
/// [`readiness_fd()`]: Self::readiness_fd
/// [`try_take()`]: Self::try_take
pub trait HeapSource {
    /// The heap payload type. Opaque to the bridge; only moved, never read.
    type Heap: Send + 'static;

    /// Attempt to take the next completed heap without blocking.
    fn try_take(&mut self) -> TryTake<Self::Heap>;

    /// The raw fd the host scheduling context should watch for readiness.
    ///
    /// Must remain valid (and refer to the same underlying handle) for the
    /// lifetime of this source value.
    fn readiness_fd(&self) -> RawFd;
}
