// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! FIFO queue of pending consumer requests, each backed by a
//! single-assignment settlement cell ([`tokio::sync::oneshot`]).
//!
//! Cancellation is never tracked eagerly: a consumer abandons a request by
//! dropping its receiving end, and the queue discovers this lazily through
//! [`Sender::is_closed()`] at the known checkpoints (entry-operation start,
//! dispatch start). Only front entries are ever purged, since only the front
//! entry is ever a delivery target - a full-queue scan would change the
//! amortized cost without changing behavior.
//!
//! [`Sender::is_closed()`]: tokio::sync::oneshot::Sender::is_closed

use crate::source::StoppedError;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// What a waiter settles with: the next heap, or the terminal stop error.
pub(crate) type Settlement<H> = Result<H, StoppedError>;

/// Ordered collection of pending waiters. FIFO among live entries.
pub(crate) struct WaiterQueue<H> {
    queue: VecDeque<oneshot::Sender<Settlement<H>>>,
}

impl<H> WaiterQueue<H> {
    pub fn new() -> Self { Self { queue: VecDeque::new() } }

    /// Append a freshly created waiter at the tail.
    pub fn enqueue(&mut self, waiter: oneshot::Sender<Settlement<H>>) {
        self.queue.push_back(waiter);
    }

    /// Remove the most recently enqueued waiter. Used to back out an enqueue
    /// whose listener activation failed, before the lock is released.
    pub fn drop_newest(&mut self) { self.queue.pop_back(); }

    /// Pop already-cancelled waiters off the front. Queue order among the
    /// remaining entries is untouched.
    pub fn purge_front_cancelled(&mut self) {
        while self.queue.front().is_some_and(oneshot::Sender::is_closed) {
            self.queue.pop_front();
        }
    }

    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    pub fn len(&self) -> usize { self.queue.len() }

    /// Settle the oldest live waiter with `heap`.
    ///
    /// A waiter can cancel in the window between the purge checkpoint and the
    /// send; such waiters hand the settlement back and the next one is tried.
    /// Returns the heap if every remaining waiter turned out cancelled, so
    /// the caller can stash it instead of dropping it.
    pub fn deliver(&mut self, heap: H) -> Option<H> {
        let mut heap = heap;
        while let Some(waiter) = self.queue.pop_front() {
            match waiter.send(Ok(heap)) {
                Ok(()) => return None,
                Err(rejected) => match rejected {
                    Ok(reclaimed) => heap = reclaimed,
                    Err(_) => return None,
                },
            }
        }
        Some(heap)
    }

    /// Settle every waiter, in queue order, with the same terminal error, and
    /// clear the queue. Waiters that cancelled in the meantime are skipped
    /// silently.
    pub fn fail_all(&mut self, error: &StoppedError) {
        for waiter in self.queue.drain(..) {
            drop(waiter.send(Err(error.clone())));
        }
    }
}
