// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The [`ReaderRegistry`] boundary trait: the one capability the bridge needs
//! from its host scheduling context.
//!
//! The bridge never polls. It hands the context a file descriptor and a
//! callback, and expects the callback to run whenever the fd becomes
//! readable. Which multiplexer sits behind that contract is an injected
//! dependency - [`MioReactor`] in this crate, a recording mock in tests - so
//! there is deliberately no ambient default registry.
//!
//! [`MioReactor`]: super::mio_reactor::MioReactor

use std::{io, os::fd::RawFd, sync::Arc};

/// Callback invoked by the registry on the registry's own dispatch context
/// whenever a registered fd reads as ready.
///
/// `Send + Sync` because registration crosses threads and the registry may
/// clone the callback for its dispatch loop.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// Readiness-registration capability of a host scheduling context.
///
/// # Contract
///
/// - Registering an fd that is *already* readable must still produce at least
///   one callback invocation (registration counts as an initial edge).
/// - After [`unregister_reader()`] returns, at most one stale in-flight
///   invocation may still occur; callers must tolerate that (the bridge
///   does: a readiness event with no demand is a no-op).
/// - Registering an already-registered fd replaces its callback rather than
///   duplicating the registration.
///
/// # Triggering
///
/// Implementations based on epoll/kqueue via [`mio`] are edge-triggered: one
/// invocation may coalesce any number of source events, and no re-fire occurs
/// while data merely remains buffered. Consumers of this trait must drain
/// accordingly.
///
/// [`unregister_reader()`]: Self::unregister_reader
pub trait ReaderRegistry: Send + Sync {
    /// Start invoking `callback` whenever `fd` becomes readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying multiplexer rejects the
    /// registration (e.g. fd limit reached, invalid fd).
    fn register_reader(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<()>;

    /// Stop invoking the callback for `fd`. Unknown fds are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying multiplexer fails to remove a live
    /// registration.
    fn unregister_reader(&self, fd: RawFd) -> io::Result<()>;
}
