//! Client Module
//!
//! Request helpers for programs talking to the DeskPad listener:
//! - socket: one connection per request over the Unix socket
//! - fallback: the broadcast control channel, used when no listener answers

pub mod fallback;
pub mod socket;

pub use fallback::{FallbackClient, FallbackReply, ReplySource, ReplyTarget};
pub use socket::SocketClient;

/// Client tests module
#[cfg(test)]
mod client_tests;
