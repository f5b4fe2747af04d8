//! Server Module
//!
//! Host-side request handling for DeskPad. The module is organized into:
//! - dispatcher: decodes requests and runs them against the display registry
//! - listener: the Unix socket accept loop and per-connection workers
//! - control: the broadcast control channel for clients without a socket
//! - reply: secondary reply delivery (broadcast channel and reply file)

/// Request decoding and registry dispatch
pub mod dispatcher;

/// Unix socket listener
pub mod listener;

/// Broadcast control channel listener
pub mod control;

/// Secondary reply delivery
pub mod reply;

pub use control::ControlListener;
pub use dispatcher::{Dispatcher, Handler, Outcome};
pub use listener::{ServerOptions, SocketServer};
pub use reply::ReplyFanout;
