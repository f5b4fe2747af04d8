//! Framed byte channel over one Unix stream connection.
//!
//! One connection carries exactly one request and one response. The
//! requester writes its payload and shuts down its write half; the peer reads
//! until end-of-stream, answers, and closes. There is no length prefix and no
//! delimiter: end-of-stream is the frame boundary.
//!
//! The socket is kept in non-blocking mode and every potentially blocking step
//! is bounded by a [`Deadline`].

use std::io::{self, Read, Write};
use std::mem;
use std::net::Shutdown;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::wait::{self, Deadline, Readiness};
use crate::error::{SocketError, describe_os_error};

/// Read buffer size for one `read(2)` call
const READ_CHUNK: usize = 4096;
/// First sleep after a would-block write or a full listen backlog
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
/// Upper bound for the backoff sleep
const MAX_BACKOFF: Duration = Duration::from_millis(100);
/// Default budget for writing one whole message
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct FramedChannel {
    stream: UnixStream,
    write_timeout: Duration,
}

impl FramedChannel {
    /// Connect to the listener at `path`, giving up after `timeout`.
    ///
    /// A missing socket file or a path nobody listens on is
    /// [`SocketError::ConnectionRefused`]; running out of time is
    /// [`SocketError::ConnectTimeout`].
    pub fn connect(path: &Path, timeout: Duration) -> Result<Self, SocketError> {
        let (addr, addr_len) = socket_address(path)?;
        let deadline = Deadline::after(timeout);
        let stream = new_stream_socket()?;
        let fd = stream.as_raw_fd();

        let mut backoff = INITIAL_BACKOFF;
        loop {
            let rc = unsafe {
                libc::connect(
                    fd,
                    &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                    addr_len,
                )
            };
            if rc == 0 {
                break;
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EISCONN) => break,
                Some(libc::EINPROGRESS) | Some(libc::EALREADY) | Some(libc::EINTR) => {
                    finish_connect(&stream, path, timeout, deadline)?;
                    break;
                }
                // Listen backlog is full: the attempt did not start, so retry.
                Some(libc::EAGAIN) => {
                    if deadline.has_elapsed() {
                        return Err(SocketError::ConnectTimeout(format!(
                            "listener at {} stayed busy for {:.3}s",
                            path.display(),
                            timeout.as_secs_f64()
                        )));
                    }
                    thread::sleep(backoff.min(deadline.remaining()));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Some(libc::ENOENT) => {
                    return Err(SocketError::ConnectionRefused(format!(
                        "socket not found at {}",
                        path.display()
                    )));
                }
                Some(libc::ECONNREFUSED) => {
                    return Err(SocketError::ConnectionRefused(format!(
                        "connection refused to {}",
                        path.display()
                    )));
                }
                _ => {
                    return Err(SocketError::ConnectionFailed(describe_os_error(
                        "connect failed",
                        &err,
                    )));
                }
            }
        }

        debug!("Connected to {}", path.display());
        Ok(Self {
            stream,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Wrap an already connected stream, typically one returned by `accept`.
    pub fn from_stream(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Write the whole buffer, retrying partial writes.
    ///
    /// A would-block condition sleeps with a growing backoff; the write is
    /// abandoned once the channel's write timeout has elapsed.
    pub fn send_all(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
        let deadline = Deadline::after(self.write_timeout);
        let mut backoff = INITIAL_BACKOFF;
        let mut sent = 0;

        while sent < bytes.len() {
            match self.stream.write(&bytes[sent..]) {
                Ok(0) => {
                    return Err(SocketError::SendFailed(
                        "socket closed during write".to_string(),
                    ));
                }
                Ok(n) => {
                    sent += n;
                    backoff = INITIAL_BACKOFF;
                    trace!("Wrote {} bytes ({}/{})", n, sent, bytes.len());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if deadline.has_elapsed() {
                        return Err(SocketError::SendFailed(format!(
                            "write stalled after {} of {} bytes",
                            sent,
                            bytes.len()
                        )));
                    }
                    thread::sleep(backoff.min(deadline.remaining()));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    return Err(SocketError::SendFailed(describe_os_error("write failed", &e)));
                }
            }
        }
        Ok(())
    }

    /// Shut down the write half only. The peer observes end-of-stream while
    /// this side can still read the answer.
    pub fn half_close(&self) -> Result<(), SocketError> {
        self.stream
            .shutdown(Shutdown::Write)
            .map_err(|e| SocketError::SendFailed(describe_os_error("shutdown failed", &e)))
    }

    /// Collect bytes until the peer closes its write half.
    pub fn read_to_end(&mut self, timeout: Duration) -> Result<Vec<u8>, SocketError> {
        self.read_to_end_limited(timeout, usize::MAX)
    }

    /// Like [`read_to_end`](Self::read_to_end) but refuses more than `limit` bytes.
    pub fn read_to_end_limited(
        &mut self,
        timeout: Duration,
        limit: usize,
    ) -> Result<Vec<u8>, SocketError> {
        let deadline = Deadline::after(timeout);
        let mut data = Vec::new();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            match wait::wait_readable(&self.stream, deadline) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::TimedOut) => {
                    return Err(SocketError::ReadTimeout(format!(
                        "no end of stream after {:.3}s ({} bytes received)",
                        timeout.as_secs_f64(),
                        data.len()
                    )));
                }
                Err(e) => {
                    return Err(SocketError::ReadFailed(describe_os_error("poll failed", &e)));
                }
            }

            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(data),
                Ok(n) => {
                    if data.len() + n > limit {
                        return Err(SocketError::ReadFailed(format!(
                            "message exceeds {} bytes",
                            limit
                        )));
                    }
                    data.extend_from_slice(&buf[..n]);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    return Err(SocketError::ReadFailed(describe_os_error("read failed", &e)));
                }
            }
        }
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    /// Close both directions. Dropping the channel closes the descriptor too;
    /// this only makes the intent explicit at call sites.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl AsRawFd for FramedChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Wait for an in-progress connect and check the socket's pending error.
fn finish_connect(
    stream: &UnixStream,
    path: &Path,
    timeout: Duration,
    deadline: Deadline,
) -> Result<(), SocketError> {
    match wait::wait_writable(stream, deadline) {
        Ok(Readiness::Ready) => {}
        Ok(Readiness::TimedOut) => {
            return Err(SocketError::ConnectTimeout(format!(
                "connection to {} timed out after {:.3}s",
                path.display(),
                timeout.as_secs_f64()
            )));
        }
        Err(e) => {
            return Err(SocketError::ConnectionFailed(describe_os_error("poll failed", &e)));
        }
    }

    match stream.take_error() {
        Ok(None) => Ok(()),
        Ok(Some(e)) if e.raw_os_error() == Some(libc::ECONNREFUSED) => Err(
            SocketError::ConnectionRefused(format!("connection refused to {}", path.display())),
        ),
        Ok(Some(e)) => Err(SocketError::ConnectionFailed(describe_os_error(
            "connection failed",
            &e,
        ))),
        Err(e) => Err(SocketError::ConnectionFailed(describe_os_error(
            "failed to get socket error",
            &e,
        ))),
    }
}

/// Build a `sockaddr_un` for `path`, rejecting paths that do not fit.
fn socket_address(path: &Path) -> Result<(libc::sockaddr_un, libc::socklen_t), SocketError> {
    let bytes = path.as_os_str().as_bytes();
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    if bytes.is_empty() {
        return Err(SocketError::InvalidSocketPath("empty socket path".to_string()));
    }
    if bytes.contains(&0) {
        return Err(SocketError::InvalidSocketPath(format!(
            "socket path contains a NUL byte: {}",
            path.display()
        )));
    }
    // One byte is reserved for the terminating NUL.
    if bytes.len() >= addr.sun_path.len() {
        return Err(SocketError::InvalidSocketPath(format!(
            "socket path too long ({} bytes, limit {}): {}",
            bytes.len(),
            addr.sun_path.len() - 1,
            path.display()
        )));
    }

    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    let len = mem::offset_of!(libc::sockaddr_un, sun_path) + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

/// Create a close-on-exec, non-blocking stream socket.
fn new_stream_socket() -> Result<UnixStream, SocketError> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };

    if fd < 0 {
        return Err(SocketError::SocketCreationFailed(describe_os_error(
            "socket() failed",
            &io::Error::last_os_error(),
        )));
    }

    // Owned from here on, so every early return below closes it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags >= 0 {
            unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
        }
    }

    let stream = UnixStream::from(owned);
    stream.set_nonblocking(true).map_err(|e| {
        SocketError::SocketCreationFailed(describe_os_error("failed to set non-blocking mode", &e))
    })?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_socket_address_length() {
        let (addr, len) = socket_address(Path::new("/tmp/deskpad.sock")).unwrap();
        assert_eq!(addr.sun_family, libc::AF_UNIX as libc::sa_family_t);
        let expected = mem::offset_of!(libc::sockaddr_un, sun_path) + "/tmp/deskpad.sock".len() + 1;
        assert_eq!(len as usize, expected);
    }

    #[test]
    fn test_socket_address_too_long() {
        let long = PathBuf::from(format!("/tmp/{}", "a".repeat(200)));
        match socket_address(&long) {
            Err(SocketError::InvalidSocketPath(msg)) => assert!(msg.contains("too long")),
            other => panic!("Expected InvalidSocketPath, got {other:?}"),
        }
    }

    #[test]
    fn test_socket_address_empty() {
        assert!(matches!(
            socket_address(Path::new("")),
            Err(SocketError::InvalidSocketPath(_))
        ));
    }

    #[test]
    fn test_half_close_signals_end_of_stream() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = FramedChannel::from_stream(a).unwrap();
        let mut server = FramedChannel::from_stream(b).unwrap();

        client.send_all(b"{\"command\":\"list\"}").unwrap();
        client.half_close().unwrap();

        let request = server.read_to_end(Duration::from_secs(1)).unwrap();
        assert_eq!(request, b"{\"command\":\"list\"}");

        // The client's read half is still open after the half-close.
        server.send_all(b"{\"displays\":[]}").unwrap();
        server.close();
        let response = client.read_to_end(Duration::from_secs(1)).unwrap();
        assert_eq!(response, b"{\"displays\":[]}");
    }

    #[test]
    fn test_read_limit() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut writer = FramedChannel::from_stream(a).unwrap();
        let mut reader = FramedChannel::from_stream(b).unwrap();

        writer.send_all(&[b'x'; 64]).unwrap();
        writer.half_close().unwrap();

        match reader.read_to_end_limited(Duration::from_secs(1), 16) {
            Err(SocketError::ReadFailed(msg)) => assert!(msg.contains("exceeds 16 bytes")),
            other => panic!("Expected ReadFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_large_write_survives_would_block() {
        // Larger than the default socket buffer, so the writer must retry.
        let payload = vec![b'z'; 1024 * 1024];
        let (a, b) = UnixStream::pair().unwrap();
        let mut writer = FramedChannel::from_stream(a)
            .unwrap()
            .with_write_timeout(Duration::from_secs(5));
        let mut reader = FramedChannel::from_stream(b).unwrap();

        let expected = payload.len();
        let handle = thread::spawn(move || reader.read_to_end(Duration::from_secs(5)));

        writer.send_all(&payload).unwrap();
        writer.half_close().unwrap();

        let received = handle.join().unwrap().unwrap();
        assert_eq!(received.len(), expected);
    }

    #[test]
    fn test_send_to_closed_peer_fails() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut writer = FramedChannel::from_stream(a).unwrap();
        drop(b);
        let result = writer.send_all(b"hello");
        assert!(matches!(result, Err(SocketError::SendFailed(_))));
    }
}
