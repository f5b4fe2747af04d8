//! Broadcast control channel listener.
//!
//! Serves requests posted on [`CONTROL_CHANNEL`] by clients that could not
//! reach the socket. There is no connection to answer on, so every response
//! goes through the fan-out; a request without `replyTo` is answered on the
//! generic [`RESPONSE_CHANNEL`].

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::dispatcher::Handler;
use super::listener::SHUTDOWN_POLL_INTERVAL;
use super::reply::ReplyFanout;
use crate::notify::{DatagramBroadcaster, Subscription};
use crate::protocol::{CONTROL_CHANNEL, RESPONSE_CHANNEL};

pub struct ControlListener {
    subscription: Subscription,
    handler: Arc<dyn Handler>,
    fanout: ReplyFanout,
}

impl ControlListener {
    /// Subscribe to the control channel.
    pub fn bind(
        broadcaster: &DatagramBroadcaster,
        handler: Arc<dyn Handler>,
        fanout: ReplyFanout,
    ) -> io::Result<Self> {
        let subscription = broadcaster.subscribe(CONTROL_CHANNEL)?;
        info!(
            "Listening for broadcast requests on {} in {}",
            CONTROL_CHANNEL,
            broadcaster.dir().display()
        );
        Ok(Self {
            subscription,
            handler,
            fanout,
        })
    }

    /// Serve posted requests until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::Relaxed) {
            match self.subscription.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                Ok(Some(payload)) => self.serve(&payload),
                Ok(None) => {}
                Err(e) => {
                    warn!("Control channel receive failed: {}", e);
                    std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
                }
            }
        }
        info!("Control channel listener stopping");
    }

    /// Handle one posted request and deliver its response.
    pub fn serve(&self, payload: &[u8]) {
        debug!("Control channel request of {} bytes", payload.len());
        let mut outcome = self.handler.handle(payload);
        if outcome.route.reply_to.is_none() {
            outcome.route.reply_to = Some(RESPONSE_CHANNEL.to_string());
        }
        self.fanout.deliver(&outcome.route, &outcome.response);
    }
}
