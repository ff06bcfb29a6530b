// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A [`ReaderRegistry`] that records every call and lets tests fire the
//! registered readiness callback by hand.

use crate::reactor::{ReaderRegistry, ReadyCallback};
use std::{io,
          os::fd::RawFd,
          sync::{Arc, Mutex,
                 atomic::{AtomicBool, Ordering}}};

/// One recorded registry interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryCall {
    Register(RawFd),
    Unregister(RawFd),
}

/// Recording mock of the host scheduling context. Single-slot: it models the
/// one registration a bridge holds, which is all the invariants need.
#[allow(missing_debug_implementations)]
pub struct RecordingRegistry {
    calls: Mutex<Vec<RegistryCall>>,
    callback: Mutex<Option<ReadyCallback>>,
    fail_next_register: AtomicBool,
}

impl RecordingRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
            fail_next_register: AtomicBool::new(false),
        })
    }

    /// Simulate one readiness notification: invoke the registered callback,
    /// if any, the way a reactor thread would.
    pub fn fire_ready(&self) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RegistryCall> { self.calls.lock().unwrap().clone() }

    #[must_use]
    pub fn register_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RegistryCall::Register(_)))
            .count()
    }

    #[must_use]
    pub fn unregister_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RegistryCall::Unregister(_)))
            .count()
    }

    /// Whether a registration is currently live.
    #[must_use]
    pub fn is_registered(&self) -> bool { self.callback.lock().unwrap().is_some() }

    /// Make the next [`register_reader()`] call fail, to exercise the
    /// registration-failure path.
    ///
    /// [`register_reader()`]: ReaderRegistry::register_reader
    pub fn fail_next_register(&self) {
        self.fail_next_register.store(true, Ordering::Release);
    }
}

impl ReaderRegistry for RecordingRegistry {
    fn register_reader(&self, fd: RawFd, callback: ReadyCallback) -> io::Result<()> {
        if self.fail_next_register.swap(false, Ordering::AcqRel) {
            return Err(io::Error::other("simulated registration failure"));
        }
        self.calls.lock().unwrap().push(RegistryCall::Register(fd));
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn unregister_reader(&self, fd: RawFd) -> io::Result<()> {
        self.calls.lock().unwrap().push(RegistryCall::Unregister(fd));
        *self.callback.lock().unwrap() = None;
        Ok(())
    }
}
