// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The host-scheduling-context boundary: the [`ReaderRegistry`] trait and the
//! [`MioReactor`] implementation that ships with the crate.

// Attach.
pub mod mio_reactor;
pub mod reader_registry;

// Re-export.
pub use mio_reactor::*;
pub use reader_registry::*;
