//! Notify Module
//!
//! Best-effort named broadcast side channel. A publisher posts a payload on a
//! channel name and never learns whether anyone received it; a subscriber
//! listens on one name for a bounded time.
//!
//! The shipped [`DatagramBroadcaster`] maps every channel name to a Unix
//! datagram endpoint inside one owner-only directory. Nothing in the request
//! transport depends on how delivery works, only on the [`Broadcaster`] trait.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::transport::peer::current_uid;
use crate::transport::wait::{self, Deadline, Readiness};

/// Largest payload a subscriber will receive in one piece
pub const MAX_DATAGRAM_SIZE: usize = 256 * 1024;

/// Fire-and-forget publish capability.
pub trait Broadcaster: Send + Sync {
    /// Post `payload` on `channel`. A channel nobody listens on is not an
    /// error; the payload is simply dropped.
    fn post(&self, channel: &str, payload: &[u8]) -> io::Result<()>;
}

/// Check that `channel` is usable as a single path component.
pub fn validate_channel_name(channel: &str) -> io::Result<()> {
    let valid_chars = channel
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    let starts_ok = channel
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric());

    if !valid_chars || !starts_ok {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid channel name: {:?}", channel),
        ));
    }
    Ok(())
}

/// Channel endpoints as datagram sockets in one directory.
#[derive(Debug, Clone)]
pub struct DatagramBroadcaster {
    dir: PathBuf,
}

impl DatagramBroadcaster {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn endpoint(&self, channel: &str) -> io::Result<PathBuf> {
        validate_channel_name(channel)?;
        Ok(self.dir.join(channel))
    }

    /// Start listening on `channel`. Any stale endpoint left at the same name
    /// is replaced.
    pub fn subscribe(&self, channel: &str) -> io::Result<Subscription> {
        let path = self.endpoint(channel)?;
        ensure_private_dir(&self.dir)?;

        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale endpoint {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let socket = UnixDatagram::bind(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        socket.set_nonblocking(true)?;
        debug!("Subscribed to {}", channel);

        Ok(Subscription {
            socket,
            path,
            channel: channel.to_string(),
        })
    }
}

impl Broadcaster for DatagramBroadcaster {
    fn post(&self, channel: &str, payload: &[u8]) -> io::Result<()> {
        let path = self.endpoint(channel)?;
        match check_private_dir(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No subscriber on {}; dropping payload", channel);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        let socket = UnixDatagram::unbound()?;
        socket.set_nonblocking(true)?;

        match socket.send_to(payload, &path) {
            Ok(_) => {
                debug!("Posted {} bytes on {}", payload.len(), channel);
                Ok(())
            }
            Err(e)
                if e.kind() == io::ErrorKind::NotFound
                    || e.kind() == io::ErrorKind::ConnectionRefused =>
            {
                debug!("No subscriber on {}; dropping payload", channel);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Create `dir` with mode 0700 if it does not exist yet, then check it.
fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    match fs::DirBuilder::new().recursive(true).mode(0o700).create(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }
    check_private_dir(dir)
}

/// Refuse `dir` unless it is a real directory owned by us with no group or
/// other access.
fn check_private_dir(dir: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(dir)?;
    if !metadata.is_dir() {
        return Err(unsafe_dir(dir, "not a directory"));
    }
    if metadata.uid() != current_uid() {
        return Err(unsafe_dir(dir, "owned by another user"));
    }
    if metadata.mode() & 0o077 != 0 {
        return Err(unsafe_dir(dir, "accessible by other users"));
    }
    Ok(())
}

fn unsafe_dir(dir: &Path, reason: &str) -> io::Error {
    warn!("Refusing notify directory {}: {}", dir.display(), reason);
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("notify directory {} is {}", dir.display(), reason),
    )
}

/// A live listener on one channel. The endpoint is removed on drop.
#[derive(Debug)]
pub struct Subscription {
    socket: UnixDatagram,
    path: PathBuf,
    channel: String,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait up to `timeout` for one payload.
    ///
    /// # Returns
    /// * `Ok(Some(bytes))` - A payload arrived
    /// * `Ok(None)` - Nothing arrived in time
    pub fn recv_timeout(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        recv_datagram(&self.socket, timeout)
    }

    /// A second handle on the same endpoint that can move to another thread.
    /// The endpoint itself still goes away when this subscription is dropped.
    pub fn receiver(&self) -> io::Result<Receiver> {
        Ok(Receiver {
            socket: self.socket.try_clone()?,
        })
    }
}

/// Receive-only handle obtained from [`Subscription::receiver`].
#[derive(Debug)]
pub struct Receiver {
    socket: UnixDatagram,
}

impl Receiver {
    pub fn recv_timeout(&self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        recv_datagram(&self.socket, timeout)
    }
}

fn recv_datagram(socket: &UnixDatagram, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
    let deadline = Deadline::after(timeout);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        match wait::wait_readable(socket, deadline)? {
            Readiness::Ready => {}
            Readiness::TimedOut => return Ok(None),
        }
        match socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(Some(buf));
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove endpoint {}: {}", self.path.display(), e);
            }
        }
    }
}
