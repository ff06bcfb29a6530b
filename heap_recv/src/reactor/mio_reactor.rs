// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR epoll kqueue eventfd

//! [`MioReactor`]: a host scheduling context backed by a dedicated [`mio`]
//! poll thread.
//!
//! # Architecture
//!
//! One [`std::thread`] blocks on [`mio::Poll::poll()`] for the lifetime of
//! the reactor. Registration happens from *caller* threads through a cloned
//! [`mio::Registry`] (epoll/kqueue control calls are safe concurrently with a
//! blocked wait), so no command round trip is needed for register/deregister;
//! only shutdown interrupts the blocked thread, via a [`mio::Waker`] on a
//! reserved token:
//!
//! ```text
//! ┌─────────────────────────────────┐        ┌─────────────────────────────┐
//! │ Dedicated thread                │        │ Caller threads              │
//! │   poll.poll(&mut events, None)  │◀═══════│ registry.register(fd, tok)  │
//! │   Token(0) → shutdown check     │  wake  │ registry.deregister(fd)     │
//! │   Token(n) → callbacks[n]()     │◀───────│ drop(reactor) → waker.wake  │
//! └─────────────────────────────────┘        └─────────────────────────────┘
//! ```
//!
//! # Triggering contract
//!
//! [`mio`] delivers edge-triggered readiness: registering an already-readable
//! fd yields one initial event, and further events arrive only on new
//! activity. Callbacks must drain their source accordingly (see
//! [`ReaderRegistry`] docs).
//!
//! # Lifecycle
//!
//! Dropping the reactor flags shutdown, wakes the thread, and joins it. Any
//! registrations still live at that point die with the `Poll` instance; the
//! bridge deregisters itself before that in its own `Drop`.

use super::reader_registry::{ReaderRegistry, ReadyCallback};
use mio::{Events, Interest, Poll, Token, Waker, unix::SourceFd};
use std::{collections::HashMap,
          io,
          io::ErrorKind,
          os::fd::RawFd,
          sync::{Arc, Mutex,
                 atomic::{AtomicBool, AtomicUsize, Ordering}},
          thread::JoinHandle};

/// Capacity for the [`mio::Events`] buffer.
const EVENTS_CAPACITY: usize = 16;

/// Reserved for the shutdown [`mio::Waker`]; fd registrations start at 1.
const WAKER_TOKEN: Token = Token(0);

/// Failed to create or start a [`MioReactor`].
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ReactorSpawnError {
    /// Failed to create [`mio::Poll`] (epoll/kqueue creation failed).
    #[error("Failed to create mio::Poll")]
    #[diagnostic(
        code(heap_recv::reactor::poll_creation),
        help("This usually means the system ran out of file descriptors")
    )]
    PollCreation(#[source] io::Error),

    /// Failed to clone the [`mio::Registry`] handle used for cross-thread
    /// registration.
    #[error("Failed to clone mio::Registry")]
    #[diagnostic(
        code(heap_recv::reactor::registry_clone),
        help("This usually means the system ran out of file descriptors")
    )]
    RegistryClone(#[source] io::Error),

    /// Failed to create [`mio::Waker`] (eventfd/pipe creation failed).
    #[error("Failed to create mio::Waker")]
    #[diagnostic(
        code(heap_recv::reactor::waker_creation),
        help("This usually means the system ran out of file descriptors")
    )]
    WakerCreation(#[source] io::Error),

    /// [`std::thread::Builder::spawn()`] failed.
    #[error("Failed to spawn reactor thread")]
    #[diagnostic(
        code(heap_recv::reactor::thread_spawn),
        help("The system may have reached its thread limit - check `ulimit -u`")
    )]
    ThreadSpawn(#[source] io::Error),
}

/// Owned by the dedicated thread: the poll handle, the events buffer, and a
/// shared view of the callback table.
struct ReactorWorker {
    poll: Poll,
    events: Events,
    callbacks: Arc<Mutex<HashMap<Token, ReadyCallback>>>,
    shutdown: Arc<AtomicBool>,
}

impl ReactorWorker {
    fn run(mut self) {
        loop {
            if let Err(err) = self.poll.poll(&mut self.events, None) {
                // EINTR - retry (signal interrupted syscall).
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(message = "reactor poll failed, thread exiting", error = %err);
                return;
            }

            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            for event in self.events.iter() {
                let token = event.token();
                if token == WAKER_TOKEN {
                    continue;
                }
                // Clone the callback out so it runs without the table locked;
                // a callback is allowed to re-enter register/unregister.
                let callback = self.callbacks.lock().unwrap().get(&token).cloned();
                match callback {
                    Some(callback) => callback(),
                    // Deregistration raced an in-flight event. Benign.
                    None => tracing::trace!(
                        message = "readiness for unregistered token",
                        token = ?token
                    ),
                }
            }
        }
    }
}

/// A [`ReaderRegistry`] implementation driving callbacks from a dedicated
/// [`mio`] poll thread.
///
/// Construct with [`spawn()`], share as `Arc<MioReactor>` (it coerces to the
/// `Arc<dyn ReaderRegistry>` the bridge takes). Drop tears the thread down.
///
/// [`spawn()`]: Self::spawn
#[allow(missing_debug_implementations)]
pub struct MioReactor {
    /// Cloned registry handle; (de)registration runs on caller threads.
    registry: mio::Registry,
    waker: Waker,
    callbacks: Arc<Mutex<HashMap<Token, ReadyCallback>>>,
    tokens_by_fd: Mutex<HashMap<RawFd, Token>>,
    next_token: AtomicUsize,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl MioReactor {
    /// Create the poll instance and start the dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorSpawnError`] if any OS resource creation or the
    /// thread spawn fails.
    pub fn spawn() -> Result<Self, ReactorSpawnError> {
        let poll = Poll::new().map_err(ReactorSpawnError::PollCreation)?;
        let registry = poll
            .registry()
            .try_clone()
            .map_err(ReactorSpawnError::RegistryClone)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)
            .map_err(ReactorSpawnError::WakerCreation)?;

        let callbacks = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = ReactorWorker {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            callbacks: callbacks.clone(),
            shutdown: shutdown.clone(),
        };
        let join_handle = std::thread::Builder::new()
            .name("heap-recv-reactor".into())
            .spawn(move || worker.run())
            .map_err(ReactorSpawnError::ThreadSpawn)?;

        Ok(Self {
            registry,
            waker,
            callbacks,
            tokens_by_fd: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(usize::from(WAKER_TOKEN) + 1),
            shutdown,
            join_handle: Some(join_handle),
        })
    }
}

impl ReaderRegistry for MioReactor {
    fn register_reader(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<()> {
        let mut tokens = self.tokens_by_fd.lock().unwrap();

        if let Some(token) = tokens.get(&fd) {
            // Already registered: swap the callback, keep the registration.
            self.callbacks.lock().unwrap().insert(*token, callback);
            return Ok(());
        }

        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.registry
            .register(&mut SourceFd(&fd), token, Interest::READABLE)?;
        self.callbacks.lock().unwrap().insert(token, callback);
        tokens.insert(fd, token);

        tracing::trace!(message = "registered reader", fd, token = ?token);
        Ok(())
    }

    fn unregister_reader(&self, fd: RawFd) -> io::Result<()> {
        let Some(token) = self.tokens_by_fd.lock().unwrap().remove(&fd) else {
            return Ok(());
        };
        self.callbacks.lock().unwrap().remove(&token);
        self.registry.deregister(&mut SourceFd(&fd))?;

        tracing::trace!(message = "unregistered reader", fd, token = ?token);
        Ok(())
    }
}

impl Drop for MioReactor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Err(err) = self.waker.wake() {
            tracing::warn!(message = "failed to wake reactor for shutdown", error = %err);
        }
        if let Some(join_handle) = self.join_handle.take() {
            drop(join_handle.join());
        }
    }
}
