// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words eventfd

//! An fd-notified, bounded, in-memory heap source: [`RingHeapSource`] plus its
//! producer half [`RingProducer`].
//!
//! # How readiness works
//!
//! Poll-style multiplexers ([`mio::Poll`], epoll, kqueue) can only wait on
//! file descriptors, and a plain in-memory ring has none. The same adapter
//! trick the terminal stack uses for signals (an internal pipe that becomes
//! readable when the non-fd event fires) applies here:
//!
//! ```text
//! ┌────────────────────────┐   try_push    ┌──────────────────────────┐
//! │ RingProducer (any      ├──────────────▶│ slots: VecDeque<H>       │
//! │ thread, cloneable)     │  + wake byte  │ (bounded, mutex-guarded) │
//! └────────────────────────┘               └────────────┬─────────────┘
//!                                                       │ try_take
//!         pipe: 1 byte per push, 1 on stop              ▼
//!   write end ═══════════════════════▶ read end = readiness_fd()
//! ```
//!
//! One byte is written per push and one on the stop transition; one byte is
//! consumed per successful take. The byte count is allowed to drift from the
//! slot count in narrow race windows (push made visible before its byte
//! lands, or a byte read by an overlapping take); drift only ever produces a
//! spurious readable state, which consumers absorb as [`TryTake::Empty`].
//!
//! # Stop semantics
//!
//! [`RingProducer::stop()`] is graceful: heaps already in the ring stay
//! takeable, and only a take that finds the ring empty *and* stopped reports
//! [`TryTake::Stopped`]. Pushing after stop is rejected with the heap handed
//! back. Stop is idempotent.

use super::{errors::StopCause,
            heap_source::{HeapSource, TryTake}};
use std::{collections::VecDeque,
          fmt::Debug,
          os::fd::{AsRawFd as _, OwnedFd, RawFd},
          sync::{Arc, Mutex}};

/// State behind the mutex: the slots plus the stop latch.
struct RingState<H> {
    slots: VecDeque<H>,
    capacity: usize,
    stopped: bool,
}

/// Shared between all producer clones and the source half. The pipe write end
/// lives here so it stays open for as long as either half is alive.
struct RingShared<H> {
    state: Mutex<RingState<H>>,
    write_fd: OwnedFd,
}

impl<H> RingShared<H> {
    /// Make the readiness fd readable. Called only after the corresponding
    /// state change is visible to takers.
    fn notify(&self) {
        if let Err(errno) = rustix::io::write(&self.write_fd, &[1u8]) {
            // A full pipe means tens of thousands of wake bytes are already
            // pending, so readiness is guaranteed without this one.
            if errno.kind() == std::io::ErrorKind::WouldBlock {
                tracing::trace!(message = "ring wake pipe full, readiness already pending");
            } else {
                tracing::warn!(
                    message = "failed to write ring wake byte",
                    error = %errno
                );
            }
        }
    }
}

/// Failed to create the readiness pipe for a ring source.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("Failed to create ring readiness pipe")]
#[diagnostic(
    code(heap_recv::ring::pipe_creation),
    help("This usually means the system ran out of file descriptors")
)]
pub struct RingCreationError(#[source] pub std::io::Error);

/// Rejected [`RingProducer::try_push()`]. The heap is handed back to the
/// caller in both variants, so nothing is dropped on rejection.
#[derive(Debug, thiserror::Error)]
pub enum TryPushError<H> {
    /// Every slot is occupied. Retry after a consumer takes.
    #[error("ring is full")]
    Full(H),
    /// [`RingProducer::stop()`] was already called; the ring accepts nothing
    /// further.
    #[error("ring is stopped")]
    Stopped(H),
}

/// Producer half of a bounded ring source. Cloneable; clones push into the
/// same ring.
pub struct RingProducer<H> {
    shared: Arc<RingShared<H>>,
}

/// Consumer half of a bounded ring source: a [`HeapSource`] whose readiness
/// fd is the read end of the wake pipe.
pub struct RingHeapSource<H> {
    shared: Arc<RingShared<H>>,
    read_fd: OwnedFd,
}

impl<H: Send + 'static> RingHeapSource<H> {
    /// Create a bounded ring with `capacity` slots, returning the producer
    /// and consumer halves.
    ///
    /// # Errors
    ///
    /// Returns [`RingCreationError`] if the readiness pipe cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Result<(RingProducer<H>, Self), RingCreationError> {
        assert!(capacity > 0, "ring capacity must be at least 1");

        let (read_fd, write_fd) =
            rustix::pipe::pipe_with(rustix::pipe::PipeFlags::CLOEXEC
                                    | rustix::pipe::PipeFlags::NONBLOCK)
                .map_err(|errno| RingCreationError(errno.into()))?;

        let shared = Arc::new(RingShared {
            state: Mutex::new(RingState {
                slots: VecDeque::with_capacity(capacity),
                capacity,
                stopped: false,
            }),
            write_fd,
        });

        let producer = RingProducer { shared: shared.clone() };
        Ok((producer, Self { shared, read_fd }))
    }

    /// Consume one wake byte to keep the byte count tracking the slot count.
    /// `WouldBlock` means the byte for this heap has not landed yet; the
    /// stray byte that eventually arrives is absorbed as a spurious wake.
    fn consume_wake_byte(&self) {
        let mut byte = [0u8; 1];
        if let Err(errno) = rustix::io::read(&self.read_fd, &mut byte[..])
            && errno.kind() != std::io::ErrorKind::WouldBlock
        {
            tracing::warn!(
                message = "failed to read ring wake byte",
                error = %errno
            );
        }
    }
}

impl<H: Send + 'static> HeapSource for RingHeapSource<H> {
    type Heap = H;

    fn try_take(&mut self) -> TryTake<H> {
        let heap = {
            let mut state = self.shared.state.lock().unwrap();
            match state.slots.pop_front() {
                Some(heap) => heap,
                None if state.stopped => return TryTake::Stopped(StopCause::Finished),
                None => return TryTake::Empty,
            }
        };
        self.consume_wake_byte();
        TryTake::Heap(heap)
    }

    fn readiness_fd(&self) -> RawFd { self.read_fd.as_raw_fd() }
}

impl<H> RingProducer<H> {
    /// Append a heap if there is space, making the readiness fd readable on
    /// success. Non-blocking.
    ///
    /// # Errors
    ///
    /// [`TryPushError::Full`] when every slot is occupied,
    /// [`TryPushError::Stopped`] after [`stop()`]; the heap is returned in
    /// both cases.
    ///
    /// [`stop()`]: Self::stop
    pub fn try_push(&self, heap: H) -> Result<(), TryPushError<H>> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return Err(TryPushError::Stopped(heap));
            }
            if state.slots.len() == state.capacity {
                return Err(TryPushError::Full(heap));
            }
            state.slots.push_back(heap);
        }
        // Signal only after the heap is visible to takers, outside the lock.
        self.shared.notify();
        Ok(())
    }

    /// Declare that no further heaps will be produced. Heaps already in the
    /// ring remain takeable; consumers observe the stop only once the ring
    /// drains. Safe to call any number of times; only the first transition
    /// writes a wake byte.
    pub fn stop(&self) {
        let newly_stopped = {
            let mut state = self.shared.state.lock().unwrap();
            !std::mem::replace(&mut state.stopped, true)
        };
        if newly_stopped {
            // Wake the consumer side even though no heap arrived, so a
            // drained-and-waiting bridge learns about the stop.
            self.shared.notify();
        }
    }
}

impl<H> Clone for RingProducer<H> {
    fn clone(&self) -> Self { Self { shared: self.shared.clone() } }
}

impl<H> Debug for RingProducer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock().unwrap();
        f.debug_struct("RingProducer")
            .field("len", &state.slots.len())
            .field("capacity", &state.capacity)
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl<H> Debug for RingHeapSource<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock().unwrap();
        f.debug_struct("RingHeapSource")
            .field("len", &state.slots.len())
            .field("capacity", &state.capacity)
            .field("stopped", &state.stopped)
            .field("readiness_fd", &self.read_fd.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_takes_in_push_order() {
        let (producer, mut source) = RingHeapSource::bounded(4).unwrap();
        producer.try_push(1u64).unwrap();
        producer.try_push(2u64).unwrap();

        assert!(matches!(source.try_take(), TryTake::Heap(1)));
        assert!(matches!(source.try_take(), TryTake::Heap(2)));
        assert!(matches!(source.try_take(), TryTake::Empty));
    }

    #[test]
    fn test_full_ring_hands_the_heap_back() {
        let (producer, _source) = RingHeapSource::bounded(2).unwrap();
        producer.try_push(1u64).unwrap();
        producer.try_push(2u64).unwrap();

        match producer.try_push(3u64) {
            Err(TryPushError::Full(heap)) => assert_eq!(heap, 3),
            other => panic!("expected Full rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_drains_before_reporting_stopped() {
        let (producer, mut source) = RingHeapSource::bounded(4).unwrap();
        producer.try_push(1u64).unwrap();
        producer.stop();
        producer.stop(); // idempotent

        assert!(matches!(source.try_take(), TryTake::Heap(1)));
        assert!(matches!(
            source.try_take(),
            TryTake::Stopped(StopCause::Finished)
        ));
        // Stop is sticky.
        assert!(matches!(
            source.try_take(),
            TryTake::Stopped(StopCause::Finished)
        ));
    }

    #[test]
    fn test_push_after_stop_is_rejected() {
        let (producer, _source) = RingHeapSource::bounded(2).unwrap();
        producer.stop();
        match producer.try_push(9u64) {
            Err(TryPushError::Stopped(heap)) => assert_eq!(heap, 9),
            other => panic!("expected Stopped rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_wake_byte_accounting() {
        let (producer, mut source) = RingHeapSource::bounded(4).unwrap();
        producer.try_push(1u64).unwrap();

        // One push makes the readiness fd readable with exactly one byte.
        let mut byte = [0u8; 1];
        assert_eq!(rustix::io::read(&source.read_fd, &mut byte[..]).unwrap(), 1);

        // A stolen wake byte must not wedge the take path.
        assert!(matches!(source.try_take(), TryTake::Heap(1)));
        assert!(matches!(source.try_take(), TryTake::Empty));
    }

    #[test]
    fn test_clone_pushes_into_same_ring() {
        let (producer, mut source) = RingHeapSource::bounded(4).unwrap();
        let clone = producer.clone();
        clone.try_push(7u64).unwrap();
        assert!(matches!(source.try_take(), TryTake::Heap(7)));
    }
}
