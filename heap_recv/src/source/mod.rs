// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The heap-source boundary: the [`HeapSource`] trait, its outcome and error
//! types, and the in-crate fd-notified ring implementation.

// Attach.
pub mod errors;
pub mod heap_source;
pub mod ring_source;

// Re-export.
pub use errors::*;
pub use heap_source::*;
pub use ring_source::*;
