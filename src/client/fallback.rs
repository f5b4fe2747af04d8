//! Broadcast fallback for clients that cannot reach the socket.
//!
//! The request is posted on the control channel with a private reply channel
//! and a private reply file, both derived from a fresh uuid. The client then
//! races two waits with the same bound: polling the reply file and listening
//! on the reply channel. When both have an answer the file wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_std::task;
use futures::channel::oneshot;
use futures::{FutureExt, pin_mut, select_biased};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{SocketError, describe_os_error};
use crate::notify::{Broadcaster, DatagramBroadcaster, Receiver};
use crate::protocol::{CONTROL_CHANNEL, RESPONSE_CHANNEL, Request, Response};
use crate::transport::wait::Deadline;

/// Shortest receive wait between cancellation checks
const MIN_RECEIVE_SLICE: Duration = Duration::from_millis(1);

/// Per-request reply destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel: String,
    pub file: PathBuf,
}

impl ReplyTarget {
    /// Fresh, unguessable destinations under `reply_dir`.
    pub fn generate(reply_dir: &Path) -> Self {
        let id = Uuid::new_v4();
        Self {
            channel: format!("{}.{}", RESPONSE_CHANNEL, id),
            file: reply_dir.join(format!("deskpad_response_{}.json", id)),
        }
    }
}

/// Which wait produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    File,
    Broadcast,
}

/// A response obtained over the fallback path.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackReply {
    pub response: Response,
    pub source: ReplySource,
}

pub struct FallbackClient {
    config: ClientConfig,
    broadcaster: DatagramBroadcaster,
}

impl FallbackClient {
    pub fn new(config: ClientConfig) -> Self {
        let broadcaster = DatagramBroadcaster::new(&config.notify_dir);
        Self {
            config,
            broadcaster,
        }
    }

    /// Post `request` on the control channel and wait for its answer.
    ///
    /// # Returns
    /// * `Ok(Some(reply))` - An answer arrived through either path
    /// * `Ok(None)` - Nothing arrived within the fallback timeout
    /// * `Err(SocketError)` - The request could not be posted or the answer
    ///   did not parse
    pub async fn request(&self, request: Request) -> Result<Option<FallbackReply>, SocketError> {
        self.request_with(request, ReplyTarget::generate(&self.config.reply_dir))
            .await
    }

    /// Like [`request`](Self::request) with caller-chosen reply destinations.
    pub async fn request_with(
        &self,
        request: Request,
        target: ReplyTarget,
    ) -> Result<Option<FallbackReply>, SocketError> {
        // Listen before posting so a fast answer cannot be missed.
        let subscribe_failed = |e: std::io::Error| {
            let reason = describe_os_error("cannot subscribe for the reply", &e);
            SocketError::SocketCreationFailed(reason)
        };
        let subscription = self
            .broadcaster
            .subscribe(&target.channel)
            .map_err(subscribe_failed)?;
        let receiver = subscription.receiver().map_err(subscribe_failed)?;

        let request = request
            .with_reply_to(target.channel.as_str())
            .with_reply_file(target.file.as_path());
        let payload = serde_json::to_vec(&request.to_value())
            .map_err(|e| SocketError::SerializationFailed(e.to_string()))?;

        self.broadcaster
            .post(CONTROL_CHANNEL, &payload)
            .map_err(|e| SocketError::SendFailed(describe_os_error("cannot post request", &e)))?;
        debug!("Posted {} on {}", request.command.name(), CONTROL_CHANNEL);

        let timeout = self.config.fallback_timeout;
        let interval = self.config.reply_poll_interval;
        let (tx, rx) = oneshot::channel();
        let listening =
            task::spawn_blocking(move || receive_until_canceled(&receiver, timeout, interval, tx));

        let winner = race_replies(&target.file, interval, timeout, rx).await;

        // Dropping the race cancels the listener, which stops within one slice.
        listening.await;
        // The subscription's endpoint goes away here on every path.
        drop(subscription);
        remove_reply_file(&target.file);

        match winner {
            Some((bytes, source)) => {
                let response = serde_json::from_slice(&bytes)
                    .map_err(|e| SocketError::InvalidJson(e.to_string()))?;
                Ok(Some(FallbackReply { response, source }))
            }
            None => Ok(None),
        }
    }
}

/// Wait on the reply channel in short slices until an answer arrives, the
/// timeout passes or the other side of `tx` loses interest.
fn receive_until_canceled(
    receiver: &Receiver,
    timeout: Duration,
    slice: Duration,
    tx: oneshot::Sender<Option<Vec<u8>>>,
) {
    let deadline = Deadline::after(timeout);
    let slice = slice.max(MIN_RECEIVE_SLICE);
    loop {
        if tx.is_canceled() {
            return;
        }
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            let _ = tx.send(None);
            return;
        }
        match receiver.recv_timeout(slice.min(remaining)) {
            Ok(Some(bytes)) => {
                let _ = tx.send(Some(bytes));
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Reply channel receive failed: {}", e);
                let _ = tx.send(None);
                return;
            }
        }
    }
}

/// Race the reply file against the broadcast reply.
///
/// The file branch is polled first. If the broadcast answer arrives first the
/// file is checked once more and preferred when it is already there.
async fn race_replies(
    file: &Path,
    interval: Duration,
    timeout: Duration,
    broadcast: oneshot::Receiver<Option<Vec<u8>>>,
) -> Option<(Vec<u8>, ReplySource)> {
    let file_wait = poll_reply_file(file, interval, timeout).fuse();
    let broadcast_wait = broadcast.map(|r| r.ok().flatten()).fuse();
    pin_mut!(file_wait, broadcast_wait);

    let first = select_biased! {
        from_file = file_wait => First::File(from_file),
        from_broadcast = broadcast_wait => First::Broadcast(from_broadcast),
    };

    match first {
        First::File(Some(bytes)) => Some((bytes, ReplySource::File)),
        First::File(None) => broadcast_wait
            .await
            .map(|bytes| (bytes, ReplySource::Broadcast)),
        First::Broadcast(Some(bytes)) => match read_reply_file(file).await {
            Some(from_file) => Some((from_file, ReplySource::File)),
            None => Some((bytes, ReplySource::Broadcast)),
        },
        First::Broadcast(None) => file_wait.await.map(|bytes| (bytes, ReplySource::File)),
    }
}

enum First {
    File(Option<Vec<u8>>),
    Broadcast(Option<Vec<u8>>),
}

async fn read_reply_file(path: &Path) -> Option<Vec<u8>> {
    match async_std::fs::read(async_std::path::Path::new(path)).await {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        _ => None,
    }
}

/// Poll `path` every `interval` until it appears or `timeout` passes.
async fn poll_reply_file(path: &Path, interval: Duration, timeout: Duration) -> Option<Vec<u8>> {
    let deadline = Deadline::after(timeout);
    loop {
        if let Some(bytes) = read_reply_file(path).await {
            return Some(bytes);
        }
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return None;
        }
        async_std::task::sleep(interval.min(remaining)).await;
    }
}

fn remove_reply_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed reply file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove reply file {}: {}", path.display(), e),
    }
}
