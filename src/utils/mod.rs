//! Utilities Module
//!
//! Shared helpers for the DeskPad binaries: logging setup, the daemon's
//! health file and atomic owner-only file writes.

pub mod atomic;
pub mod health;
pub mod tracing;
