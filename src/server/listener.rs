//! Socket Server Module
//!
//! Binds the filesystem socket, admits same-user peers and services each
//! admitted connection on its own worker thread: read one framed request,
//! hand it to the [`Handler`], write the response back, close, then fan the
//! response out to any secondary destinations.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::dispatcher::Handler;
use super::reply::ReplyFanout;
use crate::config::{DEFAULT_MAX_MESSAGE_SIZE, DaemonConfig};
use crate::error::{DaemonError, Result};
use crate::transport::wait::{self, Deadline, Readiness};
use crate::transport::{FramedChannel, PeerAuthorizer};

/// How often the accept loop looks at the shutdown flag
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Time a client gets to deliver its whole request
    pub read_timeout: Duration,
    /// Time allowed for writing the response
    pub write_timeout: Duration,
    /// Largest accepted request, in bytes
    pub max_message_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(1),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl From<&DaemonConfig> for ServerOptions {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            max_message_size: config.max_message_size,
        }
    }
}

/// Shared state every worker needs.
struct Service {
    handler: Arc<dyn Handler>,
    fanout: ReplyFanout,
    options: ServerOptions,
}

/// Unix socket listener for DeskPad requests.
pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
    authorizer: PeerAuthorizer,
    service: Arc<Service>,
}

impl SocketServer {
    /// Bind the socket at `path`.
    ///
    /// A stale socket file left by a previous run is removed first. The
    /// socket is made owner-only before any client can be accepted.
    pub fn bind(
        path: &Path,
        handler: Arc<dyn Handler>,
        fanout: ReplyFanout,
        options: ServerOptions,
    ) -> Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => info!("Removed stale socket at {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove stale socket {}: {}", path.display(), e),
        }

        let bind_error = |source: io::Error| DaemonError::Bind {
            path: path.display().to_string(),
            source,
        };

        let listener = UnixListener::bind(path).map_err(bind_error)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        info!("Listening on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            authorizer: PeerAuthorizer::same_user(),
            service: Arc::new(Service {
                handler,
                fanout,
                options,
            }),
        })
    }

    /// Replace the peer admission policy.
    pub fn with_authorizer(mut self, authorizer: PeerAuthorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            match wait::wait_readable(&self.listener, Deadline::after(SHUTDOWN_POLL_INTERVAL)) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::TimedOut) => continue,
                Err(e) => {
                    error!("Polling the listener failed: {}", e);
                    thread::sleep(SHUTDOWN_POLL_INTERVAL);
                    continue;
                }
            }

            match self.listener.accept() {
                Ok((stream, _)) => self.admit(stream),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => warn!("Accept failed: {}", e),
            }
        }

        info!("Socket listener stopping");
        Ok(())
    }

    /// Authorize on the accept thread, then hand the connection to a worker.
    fn admit(&self, stream: UnixStream) {
        if !self.authorizer.admit(&stream) {
            drop(stream);
            return;
        }

        let service = Arc::clone(&self.service);
        let spawned = thread::Builder::new()
            .name("deskpad-conn".to_string())
            .spawn(move || service.serve(stream));
        if let Err(e) = spawned {
            error!("Failed to spawn connection worker: {}", e);
        }
    }
}

impl Service {
    /// Service one admitted connection. The connection is closed on every path.
    fn serve(&self, stream: UnixStream) {
        let mut channel = match FramedChannel::from_stream(stream) {
            Ok(channel) => channel.with_write_timeout(self.options.write_timeout),
            Err(e) => {
                warn!("Failed to prepare connection: {}", e);
                return;
            }
        };

        let request = match channel
            .read_to_end_limited(self.options.read_timeout, self.options.max_message_size)
        {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping connection: {}", e);
                channel.close();
                return;
            }
        };
        debug!("Read {} byte request", request.len());

        let outcome = self.handler.handle(&request);

        if let Err(e) = channel.send_all(&outcome.response) {
            warn!("Failed to send response: {}", e);
        }
        channel.close();

        if !outcome.route.is_empty() {
            self.fanout.deliver(&outcome.route, &outcome.response);
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Removed socket {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket {}: {}", self.path.display(), e),
        }
    }
}
