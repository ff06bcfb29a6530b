// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Terminal-failure types shared by heap sources and the delivery bridge. See
//! [`StoppedError`] and [`StopCause`] for details.

/// Why a heap source will never produce again.
///
/// Carried inside [`StoppedError`]. `Clone` is required so one observed stop
/// can settle every queued waiter with the same cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StopCause {
    /// The producer finished gracefully and the source has drained.
    #[error("source finished producing")]
    Finished,

    /// The source (or the readiness plumbing underneath it) broke.
    #[error("source failed: {0}")]
    Failed(String),

    /// The bridge was discarded before the pending request settled.
    ///
    /// Consumers holding a `get()` future normally keep the bridge alive, so
    /// this cause only shows up when the bridge side of the settlement cell
    /// vanishes without resolving it.
    #[error("bridge disconnected before settlement")]
    Disconnected,
}

/// Terminal error surfaced by [`HeapReceiver::get()`] once the source reports
/// that it is permanently stopped.
///
/// Every waiter queued at the moment the stop is observed receives this error
/// with the same [`StopCause`]; later calls re-check the source and receive
/// it again rather than hanging.
///
/// [`HeapReceiver::get()`]: crate::HeapReceiver::get
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
#[error("heap source stopped: {cause}")]
#[diagnostic(
    code(heap_recv::source_stopped),
    help("The source will never produce another heap. Drop the bridge or stop calling get().")
)]
pub struct StoppedError {
    /// Why the source stopped, preserved verbatim from the source.
    pub cause: StopCause,
}

impl StoppedError {
    #[must_use]
    pub fn new(cause: StopCause) -> Self { Self { cause } }
}
