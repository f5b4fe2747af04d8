//! Peer credential checks for accepted connections.
//!
//! Only processes running as the same user as the listener may talk to it.
//! When the kernel cannot tell who is on the other end, the connection is
//! refused.

use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use tracing::warn;

/// Identity of the process on the other end of a local socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    /// Not every platform reports the peer's pid.
    pub pid: Option<i32>,
}

/// Read the peer's credentials from a connected stream.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn peer_credentials(stream: &UnixStream) -> io::Result<PeerCredentials> {
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(PeerCredentials {
        uid: cred.uid,
        gid: cred.gid,
        pid: (cred.pid > 0).then_some(cred.pid),
    })
}

/// Read the peer's credentials from a connected stream.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn peer_credentials(stream: &UnixStream) -> io::Result<PeerCredentials> {
    let mut uid: libc::uid_t = 0;
    let mut gid: libc::gid_t = 0;
    let ret = unsafe { libc::getpeereid(stream.as_raw_fd(), &mut uid, &mut gid) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(PeerCredentials {
        uid,
        gid,
        pid: None,
    })
}

/// Effective uid of the current process.
pub fn current_uid() -> u32 {
    unsafe { libc::geteuid() }
}

/// Why a connection was turned away.
#[derive(Debug)]
pub enum Rejection {
    /// Peer runs as another user
    UidMismatch { peer: u32, expected: u32 },
    /// The kernel did not report credentials
    Unknown(io::Error),
}

/// Same-user admission check.
#[derive(Debug, Clone, Copy)]
pub struct PeerAuthorizer {
    expected_uid: u32,
}

impl PeerAuthorizer {
    /// Admit peers running as the same user as this process.
    pub fn same_user() -> Self {
        Self {
            expected_uid: current_uid(),
        }
    }

    /// Admit peers running as `uid`.
    pub fn for_uid(uid: u32) -> Self {
        Self { expected_uid: uid }
    }

    pub fn expected_uid(&self) -> u32 {
        self.expected_uid
    }

    /// Accept or reject a freshly accepted connection. Fails closed.
    pub fn authorize(&self, stream: &UnixStream) -> Result<PeerCredentials, Rejection> {
        let creds = peer_credentials(stream).map_err(Rejection::Unknown)?;
        if creds.uid != self.expected_uid {
            return Err(Rejection::UidMismatch {
                peer: creds.uid,
                expected: self.expected_uid,
            });
        }
        Ok(creds)
    }

    /// Authorize and log the outcome; returns whether the peer may proceed.
    pub fn admit(&self, stream: &UnixStream) -> bool {
        match self.authorize(stream) {
            Ok(_) => true,
            Err(Rejection::UidMismatch { peer, expected }) => {
                warn!("Rejected connection from uid {} (expected {})", peer, expected);
                false
            }
            Err(Rejection::Unknown(e)) => {
                warn!("Could not determine peer credentials ({}); rejecting connection", e);
                false
            }
        }
    }
}
