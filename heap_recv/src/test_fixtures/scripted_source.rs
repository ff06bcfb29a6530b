// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A [`HeapSource`] that replays a scripted tape of outcomes, for driving the
//! bridge deterministically without any real fd.

use crate::source::{HeapSource, StopCause, TryTake};
use std::{collections::VecDeque,
          os::fd::RawFd,
          sync::{Arc, Mutex}};

/// The fd a [`ScriptedSource`] reports. Never polled - scripted sources pair
/// with [`RecordingRegistry`], which fires callbacks by hand.
///
/// [`RecordingRegistry`]: super::recording_registry::RecordingRegistry
pub const SCRIPTED_FD: RawFd = -1;

struct Script<H> {
    tape: VecDeque<TryTake<H>>,
    /// Once the tape yields `Stopped`, the source latches it, matching the
    /// sticky-stop contract real sources uphold.
    stopped: Option<StopCause>,
}

/// Handle for appending outcomes to a [`ScriptedSource`] after creation.
pub struct ScriptHandle<H> {
    script: Arc<Mutex<Script<H>>>,
}

/// Scripted [`HeapSource`]: each `try_take` pops the next outcome off the
/// tape, or reports [`TryTake::Empty`] when the tape has run dry.
pub struct ScriptedSource<H> {
    script: Arc<Mutex<Script<H>>>,
}

impl<H: Send + 'static> ScriptedSource<H> {
    #[must_use]
    pub fn new() -> (ScriptHandle<H>, Self) {
        let script = Arc::new(Mutex::new(Script {
            tape: VecDeque::new(),
            stopped: None,
        }));
        (ScriptHandle { script: script.clone() }, Self { script })
    }
}

impl<H> ScriptHandle<H> {
    /// Append a heap to the tape.
    pub fn push_heap(&self, heap: H) {
        self.script.lock().unwrap().tape.push_back(TryTake::Heap(heap));
    }

    /// Append a terminal stop to the tape.
    pub fn push_stop(&self, cause: StopCause) {
        self.script.lock().unwrap().tape.push_back(TryTake::Stopped(cause));
    }

    /// Outcomes still on the tape.
    #[must_use]
    pub fn remaining(&self) -> usize { self.script.lock().unwrap().tape.len() }
}

impl<H: Send + 'static> HeapSource for ScriptedSource<H> {
    type Heap = H;

    fn try_take(&mut self) -> TryTake<H> {
        let mut script = self.script.lock().unwrap();
        if let Some(cause) = &script.stopped {
            return TryTake::Stopped(cause.clone());
        }
        match script.tape.pop_front() {
            Some(TryTake::Stopped(cause)) => {
                script.stopped = Some(cause.clone());
                TryTake::Stopped(cause)
            }
            Some(outcome) => outcome,
            None => TryTake::Empty,
        }
    }

    fn readiness_fd(&self) -> RawFd { SCRIPTED_FD }
}

impl<H> std::fmt::Debug for ScriptedSource<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let script = self.script.lock().unwrap();
        f.debug_struct("ScriptedSource")
            .field("remaining", &script.tape.len())
            .field("stopped", &script.stopped)
            .finish()
    }
}

impl<H> std::fmt::Debug for ScriptHandle<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("remaining", &self.remaining())
            .finish()
    }
}
