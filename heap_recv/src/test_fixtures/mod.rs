// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Mocks for the two injected boundaries, so bridge behavior can be driven
//! deterministically: a source that replays a scripted tape, and a registry
//! that records calls and fires readiness on demand.

// Attach.
mod recording_registry;
mod scripted_source;

// Re-export.
pub use recording_registry::*;
pub use scripted_source::*;
