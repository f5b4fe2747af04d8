//! Display Module
//!
//! Bookkeeping for the virtual displays owned by the host process. Creating
//! the actual display surface is the host's business; this module only keeps
//! the records clients see.

/// Ordered, id-keyed display registry
pub mod registry;

pub use registry::DisplayRegistry;
