//! DeskPad display control
//!
//! Local request/response plumbing between the DeskPad host process, which
//! owns the virtual displays, and command-line clients. Requests travel as
//! JSON over a Unix domain socket framed by half-close; when no listener
//! answers, clients fall back to a named broadcast channel and a private
//! reply file.

pub mod client;
pub mod config;
pub mod display;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod utils;
