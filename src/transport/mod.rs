//! Transport Module
//!
//! Local request/response plumbing over Unix domain stream sockets:
//! - wait: deadline-bounded readiness polling
//! - channel: one request and one response per connection, framed by half-close
//! - peer: same-user admission for accepted connections

/// Readiness polling with absolute deadlines
pub mod wait;

/// Framed byte channel over a single connection
pub mod channel;

/// Peer credential retrieval and authorization
pub mod peer;

pub use channel::FramedChannel;
pub use peer::{PeerAuthorizer, PeerCredentials};
pub use wait::{Deadline, Readiness};

/// Connection-level tests against a real listener
#[cfg(test)]
mod transport_tests;
