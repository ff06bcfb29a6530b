// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! [`HeapReceiver`]: the asynchronous delivery bridge.
//!
//! # Architecture Overview
//!
//! The bridge converts a readiness-notified, pull-based [`HeapSource`] into a
//! suspend-until-delivered request/response surface:
//!
//! ```text
//! ┌─────────────┐  readiness fd  ┌────────────────┐  callback   ┌───────────────┐
//! │ HeapSource  ├───────────────▶│ ReaderRegistry ├────────────▶│ dispatch loop │
//! │ (try_take)  │                │ (host context) │             │ (drain+settle)│
//! └──────▲──────┘                └────────────────┘             └───────┬───────┘
//!        │ fast path                                    settle oldest   │
//!        │                                                              ▼
//! ┌──────┴──────────────────────────────────────────────────────────────────────┐
//! │ get(): purge → fast take → enqueue oneshot waiter → activate → await        │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Piece              | Responsibility                                             |
//! | :----------------- | :--------------------------------------------------------- |
//! | [`get()`]          | Fast path, waiter creation, suspension                     |
//! | [`WaiterQueue`]    | FIFO order, lazy cancellation purge                        |
//! | dispatch loop      | Per-readiness drain; settle waiters; stop fan-out          |
//! | listener toggle    | Registered on the readiness fd iff demand exists           |
//!
//! # Listening invariant
//!
//! Immediately after any operation settles, the bridge is registered on the
//! source's readiness fd **iff** the waiter queue holds at least one live
//! entry. A bridge with no demand costs the host context nothing, and a
//! dropped or permanently stopped bridge leaves no registration behind.
//!
//! # State machine
//!
//! ```text
//! Idle (no waiters, not listening)
//!   │ get() finds nothing buffered
//!   ▼
//! Armed (≥1 waiter, listening) ──queue drained──▶ Idle
//!   │ source reports Stopped
//!   ▼
//! Stopped (terminal, latched; every waiter failed with the same cause)
//! ```
//!
//! # Concurrency model
//!
//! `get()` may be called from any task; the dispatch callback runs on the
//! registry's dispatch context. One mutex serializes the waiter queue, the
//! listening flag, the stash, and all access to the source's non-blocking
//! take - the discipline a multi-threaded host requires. The lock is never
//! held across a suspension point: `get()` awaits its settlement cell only
//! after releasing it, and the dispatch loop never suspends at all.
//!
//! [`WaiterQueue`]: super::waiter_queue::WaiterQueue
//! [`get()`]: HeapReceiver::get

use super::waiter_queue::WaiterQueue;
use crate::{reactor::{ReaderRegistry, ReadyCallback},
            source::{HeapSource, StopCause, StoppedError, TryTake}};
use std::{fmt::Debug,
          os::fd::RawFd,
          sync::{Arc, Mutex, Weak}};
use tokio::sync::oneshot;

/// Everything the mutex guards. See the [module docs](mod@self) for why the
/// source itself lives under the same lock as the queue and flags.
struct BridgeState<S: HeapSource> {
    source: S,
    /// Cached so deactivation works without touching the source.
    readiness_fd: RawFd,
    registry: Arc<dyn ReaderRegistry>,
    /// Handed to the registry on every activation; holds only a [`Weak`]
    /// back-reference, so a discarded bridge never dispatches.
    callback: ReadyCallback,
    waiters: WaiterQueue<S::Heap>,
    /// A heap whose targeted waiter cancelled inside the settlement window.
    /// Consulted before the source by both `get()` and dispatch, preserving
    /// order and the no-drop guarantee.
    stash: Option<S::Heap>,
    listening: bool,
    /// Latched once the source reports stop; no reactivation afterwards.
    stopped: bool,
}

impl<S: HeapSource> BridgeState<S> {
    /// Register the dispatch callback for the readiness fd. No-op while
    /// already listening or after permanent stop.
    fn activate(&mut self) -> std::io::Result<()> {
        if self.listening || self.stopped {
            return Ok(());
        }
        self.registry
            .register_reader(self.readiness_fd, self.callback.clone())?;
        self.listening = true;
        Ok(())
    }

    /// Unregister from the readiness fd. No-op while not listening.
    fn deactivate(&mut self) {
        if !self.listening {
            return;
        }
        if let Err(err) = self.registry.unregister_reader(self.readiness_fd) {
            tracing::warn!(
                message = "failed to unregister readiness callback",
                fd = self.readiness_fd,
                error = %err
            );
        }
        self.listening = false;
    }

    /// Drop cancelled waiters off the queue front, then enforce the
    /// listening invariant.
    fn purge_cancelled(&mut self) {
        self.waiters.purge_front_cancelled();
        if self.waiters.is_empty() {
            self.deactivate();
        }
    }
}

/// Dispatch loop, invoked once per readiness notification.
///
/// The registry's triggering contract is edge-based (see [`ReaderRegistry`]),
/// so a single notification may stand for several buffered heaps - the loop
/// drains until the source reports [`TryTake::Empty`] or demand runs out,
/// rather than taking once per notification. Under a level-triggered registry
/// the same loop is merely eager.
fn on_ready<S: HeapSource>(inner: &Mutex<BridgeState<S>>) {
    // A consumer thread that panicked while holding the lock already tore the
    // bridge down; the reactor thread must not follow it.
    let Ok(mut state) = inner.lock() else { return };

    if state.stopped {
        return;
    }

    loop {
        state.purge_cancelled();
        if state.waiters.is_empty() {
            // A readiness event with no demand is legitimate (deactivation
            // raced an in-flight notification, or a heap arrived incomplete).
            break;
        }

        let outcome = match state.stash.take() {
            Some(heap) => TryTake::Heap(heap),
            None => state.source.try_take(),
        };

        match outcome {
            TryTake::Empty => break,
            TryTake::Heap(heap) => {
                if let Some(unclaimed) = state.waiters.deliver(heap) {
                    state.stash = Some(unclaimed);
                }
                if state.waiters.is_empty() {
                    state.deactivate();
                }
            }
            TryTake::Stopped(cause) => {
                tracing::debug!(
                    message = "source stopped, failing all waiters",
                    waiters = state.waiters.len(),
                    cause = %cause
                );
                let error = StoppedError::new(cause);
                state.waiters.fail_all(&error);
                state.deactivate();
                state.stopped = true;
                break;
            }
        }
    }
}

/// Asynchronous delivery bridge from one [`HeapSource`] to its consumers.
///
/// Construction takes the source's consumer-side handle and the host
/// scheduling context explicitly - there is no ambient default registry. See
/// the [module docs](mod@self) for the architecture and invariants, and
/// [`get()`] for the one public operation.
///
/// [`get()`]: Self::get
pub struct HeapReceiver<S: HeapSource> {
    inner: Arc<Mutex<BridgeState<S>>>,
}

impl<S> HeapReceiver<S>
where
    S: HeapSource + Send + 'static,
{
    /// Create a bridge over `source`, dispatching through `registry`.
    ///
    /// Nothing is registered yet; registration appears with the first waiter
    /// and disappears with the last.
    #[must_use]
    pub fn new(source: S, registry: Arc<dyn ReaderRegistry>) -> Self {
        let readiness_fd = source.readiness_fd();
        let inner = Arc::new_cyclic(|weak: &Weak<Mutex<BridgeState<S>>>| {
            let weak = weak.clone();
            let callback: ReadyCallback = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    on_ready(&inner);
                }
            });
            Mutex::new(BridgeState {
                source,
                readiness_fd,
                registry,
                callback,
                waiters: WaiterQueue::new(),
                stash: None,
                listening: false,
                stopped: false,
            })
        });
        Self { inner }
    }

    /// Wait for the next heap.
    ///
    /// Resolves immediately - no waiter, no registration, no scheduling round
    /// trip - when a heap is already obtainable and nobody is queued ahead.
    /// Otherwise the caller suspends on a fresh settlement cell until the
    /// dispatch loop serves it, in strict FIFO order among live requests.
    ///
    /// Cancel-safe: dropping the future abandons the request; the slot is
    /// purged lazily at the next checkpoint and never consumes a heap.
    ///
    /// # Errors
    ///
    /// [`StoppedError`] once the source is permanently stopped (every call
    /// after that re-checks the source and fails the same way rather than
    /// hanging), or with [`StopCause::Failed`] if readiness registration
    /// itself fails.
    pub async fn get(&self) -> Result<S::Heap, StoppedError> {
        let waiter_rx = {
            let mut state = self.inner.lock().unwrap();
            state.purge_cancelled();

            if state.waiters.is_empty() {
                if let Some(heap) = state.stash.take() {
                    return Ok(heap);
                }
                match state.source.try_take() {
                    TryTake::Heap(heap) => return Ok(heap),
                    TryTake::Stopped(cause) => return Err(StoppedError::new(cause)),
                    TryTake::Empty => {}
                }
            }

            let (waiter_tx, waiter_rx) = oneshot::channel();
            state.waiters.enqueue(waiter_tx);
            if let Err(err) = state.activate() {
                // Without a live registration this waiter could never be
                // served; back the enqueue out and surface the failure.
                state.waiters.drop_newest();
                return Err(StoppedError::new(StopCause::Failed(format!(
                    "readiness registration failed: {err}"
                ))));
            }
            waiter_rx
        };

        match waiter_rx.await {
            Ok(settlement) => settlement,
            Err(_) => Err(StoppedError::new(StopCause::Disconnected)),
        }
    }

    /// Number of requests currently queued (point-in-time snapshot; may
    /// include cancelled entries not yet purged).
    #[must_use]
    pub fn pending_waiters(&self) -> usize { self.inner.lock().unwrap().waiters.len() }

    /// Whether the bridge currently holds a readiness registration.
    #[must_use]
    pub fn is_listening(&self) -> bool { self.inner.lock().unwrap().listening }

    /// Consume the bridge into an async stream of heaps.
    ///
    /// Yields until the source stops; the terminal [`StoppedError`] ends the
    /// stream instead of surfacing as an item.
    pub fn heaps(self) -> impl futures_core::Stream<Item = S::Heap> {
        async_stream::stream! {
            loop {
                match self.get().await {
                    Ok(heap) => yield heap,
                    Err(error) => {
                        tracing::debug!(message = "heap stream ended", cause = %error);
                        break;
                    }
                }
            }
        }
    }
}

impl<S: HeapSource> Drop for HeapReceiver<S> {
    /// A discarded bridge must not leave a registration dangling. Any stale
    /// in-flight callback finds only a dead [`Weak`] and does nothing.
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.lock() {
            state.deactivate();
        }
    }
}

impl<S: HeapSource> Debug for HeapReceiver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock().unwrap();
        f.debug_struct("HeapReceiver")
            .field("pending_waiters", &state.waiters.len())
            .field("listening", &state.listening)
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{source::StopCause,
                test_fixtures::{RecordingRegistry, RegistryCall, ScriptHandle,
                                ScriptedSource}};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn make_bridge() -> (
        ScriptHandle<u64>,
        Arc<RecordingRegistry>,
        Arc<HeapReceiver<ScriptedSource<u64>>>,
    ) {
        let (script, source) = ScriptedSource::new();
        let registry = RecordingRegistry::new();
        let receiver = Arc::new(HeapReceiver::new(source, registry.clone()));
        (script, registry, receiver)
    }

    /// Block until `count` requests are queued, so enqueue order (and thus
    /// FIFO position) is deterministic across spawned tasks.
    async fn wait_for_waiters(
        receiver: &Arc<HeapReceiver<ScriptedSource<u64>>>,
        count: usize,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while receiver.pending_waiters() != count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("waiter count never reached the expected value");
    }

    fn spawn_get(
        receiver: &Arc<HeapReceiver<ScriptedSource<u64>>>,
    ) -> tokio::task::JoinHandle<Result<u64, StoppedError>> {
        let receiver = receiver.clone();
        tokio::spawn(async move { receiver.get().await })
    }

    #[tokio::test]
    async fn test_fast_path_skips_registration() {
        // Test: a heap already buffered resolves get() with no waiter and no
        // listener activation.
        let (script, registry, receiver) = make_bridge();
        script.push_heap(7);

        assert_eq!(receiver.get().await.unwrap(), 7);
        assert!(registry.calls().is_empty());
        assert_eq!(receiver.pending_waiters(), 0);
        assert!(!receiver.is_listening());
    }

    #[tokio::test]
    async fn test_fifo_order_across_pending_waiters() {
        // Test: N pending gets served by N heaps arriving one at a time, in
        // issue order.
        let (script, registry, receiver) = make_bridge();

        let mut handles = Vec::new();
        for expected_count in 1..=3 {
            handles.push(spawn_get(&receiver));
            wait_for_waiters(&receiver, expected_count).await;
        }

        for heap in [10, 11, 12] {
            script.push_heap(heap);
            registry.fire_ready();
        }

        let mut received = Vec::new();
        for handle in handles {
            received.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(received, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn test_listener_toggles_with_demand() {
        // Test: registration exists iff the queue is non-empty, across an
        // enqueue → deliver → enqueue cycle.
        let (script, registry, receiver) = make_bridge();

        let handle = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;
        assert!(receiver.is_listening());
        assert_eq!(registry.register_count(), 1);

        script.push_heap(1);
        registry.fire_ready();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert!(!receiver.is_listening());
        assert_eq!(registry.unregister_count(), 1);

        // Demand returns, so must the registration.
        let handle = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;
        assert_eq!(registry.register_count(), 2);
        script.push_heap(2);
        registry.fire_ready();
        assert_eq!(handle.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_second_waiter_does_not_reregister() {
        // Test: activating an already-active listener is a no-op - two queued
        // waiters share one registration.
        let (script, registry, receiver) = make_bridge();

        let first = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;
        let second = spawn_get(&receiver);
        wait_for_waiters(&receiver, 2).await;
        assert_eq!(registry.register_count(), 1);

        script.push_heap(1);
        script.push_heap(2);
        registry.fire_ready();

        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert_eq!(second.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stop_fans_out_to_all_waiters() {
        // Test: 3 pending waiters all resolve with the same cause; the queue
        // clears and the listener deactivates; later gets fail immediately.
        let (script, registry, receiver) = make_bridge();

        let mut handles = Vec::new();
        for expected_count in 1..=3 {
            handles.push(spawn_get(&receiver));
            wait_for_waiters(&receiver, expected_count).await;
        }

        script.push_stop(StopCause::Finished);
        registry.fire_ready();

        for handle in handles {
            let error = handle.await.unwrap().unwrap_err();
            assert_eq!(error.cause, StopCause::Finished);
        }
        assert_eq!(receiver.pending_waiters(), 0);
        assert!(!receiver.is_listening());
        assert_eq!(registry.unregister_count(), 1);

        // Post-stop get() re-checks the source instead of hanging, and never
        // re-registers.
        let error = receiver.get().await.unwrap_err();
        assert_eq!(error.cause, StopCause::Finished);
        assert_eq!(registry.register_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        // Test: with waiters [A, B, C] and B cancelled, the next heap goes to
        // A and the one after to C; B never consumes a heap.
        let (script, registry, receiver) = make_bridge();

        let handle_a = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;
        let handle_b = spawn_get(&receiver);
        wait_for_waiters(&receiver, 2).await;
        let handle_c = spawn_get(&receiver);
        wait_for_waiters(&receiver, 3).await;

        handle_b.abort();
        assert!(handle_b.await.unwrap_err().is_cancelled());

        script.push_heap(10);
        registry.fire_ready();
        assert_eq!(handle_a.await.unwrap().unwrap(), 10);

        script.push_heap(11);
        registry.fire_ready();
        assert_eq!(handle_c.await.unwrap().unwrap(), 11);

        assert_eq!(script.remaining(), 0);
    }

    #[tokio::test]
    async fn test_readiness_with_only_cancelled_demand_consumes_nothing() {
        // Test: a notification that finds only cancelled waiters purges them
        // and deactivates without taking a heap; the heap stays for the next
        // fast-path get().
        let (script, registry, receiver) = make_bridge();

        let handle = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        script.push_heap(42);
        registry.fire_ready();
        assert_eq!(script.remaining(), 1);
        assert!(!receiver.is_listening());
        assert_eq!(registry.unregister_count(), 1);

        assert_eq!(receiver.get().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_single_notification_drains_buffered_heaps() {
        // Test: one notification standing for two buffered heaps serves both
        // queued waiters (edge-triggered drain), still in FIFO order.
        let (script, registry, receiver) = make_bridge();

        let first = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;
        let second = spawn_get(&receiver);
        wait_for_waiters(&receiver, 2).await;

        script.push_heap(1);
        script.push_heap(2);
        registry.fire_ready();

        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert_eq!(second.await.unwrap().unwrap(), 2);
        assert!(!receiver.is_listening());
    }

    #[tokio::test]
    async fn test_leftover_heap_stays_buffered_when_demand_runs_out() {
        // Test: draining stops as soon as the queue empties; the surplus heap
        // is served by a later fast-path get() with no new registration.
        let (script, registry, receiver) = make_bridge();

        let handle = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;

        script.push_heap(1);
        script.push_heap(2);
        registry.fire_ready();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert_eq!(script.remaining(), 1);

        assert_eq!(receiver.get().await.unwrap(), 2);
        assert_eq!(registry.register_count(), 1);
    }

    #[tokio::test]
    async fn test_registration_failure_fails_the_request() {
        // Test: when the registry rejects activation, the request fails
        // instead of hanging and no waiter is left behind.
        let (_script, registry, receiver) = make_bridge();
        registry.fail_next_register();

        let error = receiver.get().await.unwrap_err();
        assert!(matches!(error.cause, StopCause::Failed(_)));
        assert_eq!(receiver.pending_waiters(), 0);
        assert!(!receiver.is_listening());
        assert_eq!(registry.register_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        // Test: discarding the bridge while armed leaves no registration
        // behind.
        let (_script, registry, receiver) = make_bridge();

        let handle = spawn_get(&receiver);
        wait_for_waiters(&receiver, 1).await;
        assert!(registry.is_registered());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        drop(receiver);
        assert!(!registry.is_registered());
        assert_eq!(
            registry.calls().last(),
            Some(&RegistryCall::Unregister(crate::test_fixtures::SCRIPTED_FD))
        );
    }

    #[tokio::test]
    async fn test_heaps_stream_ends_on_stop() {
        // Test: the stream adapter yields heaps until the source stops, then
        // terminates instead of yielding an error item.
        use futures_util::StreamExt as _;

        let (script, _registry, receiver) = make_bridge();
        script.push_heap(1);
        script.push_heap(2);
        script.push_stop(StopCause::Finished);

        let receiver = Arc::into_inner(receiver).unwrap();
        let collected: Vec<u64> = receiver.heaps().collect().await;
        assert_eq!(collected, vec![1, 2]);
    }
}
