//! # Sink Module
//!
//! Display surfaces for subscription output: one surface per topic plus one
//! aggregated console surface. The core only depends on the narrow
//! [`Surface`]/[`SurfaceProvider`] seam; the binary ships a terminal-backed
//! provider and tests use an in-memory one that can simulate external closure.

pub mod registry;
pub mod surface;

pub use registry::SinkRegistry;
#[cfg(test)]
pub use surface::MemoryProvider;
pub use surface::{SinkError, SinkEvent, SinkId, Surface, SurfaceProvider, TerminalProvider};
