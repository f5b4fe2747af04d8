//! Reply Delivery Fan-out
//!
//! Pushes a response to the secondary destinations a request named: a
//! broadcast channel (`replyTo`) and a file (`replyFile`). Both are best
//! effort and independent of each other and of the primary socket reply.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::notify::Broadcaster;
use crate::protocol::ReplyRoute;
use crate::utils::atomic::write_private;

/// Secondary reply delivery.
#[derive(Clone, Default)]
pub struct ReplyFanout {
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl ReplyFanout {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            broadcaster: Some(broadcaster),
        }
    }

    /// Fan-out that only writes reply files.
    pub fn files_only() -> Self {
        Self { broadcaster: None }
    }

    /// Deliver `payload` to every destination in `route`.
    ///
    /// # Returns
    /// * `usize` - Number of destinations that accepted the payload
    pub fn deliver(&self, route: &ReplyRoute, payload: &[u8]) -> usize {
        let mut delivered = 0;

        if let Some(channel) = &route.reply_to {
            match &self.broadcaster {
                Some(broadcaster) => match broadcaster.post(channel, payload) {
                    Ok(()) => {
                        debug!("Reply posted on {}", channel);
                        delivered += 1;
                    }
                    Err(e) => warn!("Failed to post reply on {}: {}", channel, e),
                },
                None => debug!("No broadcaster configured; skipping replyTo {}", channel),
            }
        }

        if let Some(path) = &route.reply_file {
            match write_private(path, payload) {
                Ok(()) => {
                    debug!("Reply written to {}", path.display());
                    delivered += 1;
                }
                Err(e) => warn!("Failed to write reply file {}: {}", path.display(), e),
            }
        }

        delivered
    }
}

