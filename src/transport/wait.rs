//! Readiness waiting with absolute deadlines.
//!
//! A thin wrapper over `poll(2)`. Callers compute one [`Deadline`] per logical
//! operation; each wait recomputes the remaining time from the clock, so
//! repeated waits never drift past the original budget. Signal interruptions
//! are retried here and never reach the caller.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

/// Bound used when a timeout is too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// An absolute point in time bounding one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// `timeout` from now. Timeouts past what the clock can represent are
    /// clamped to a far-future deadline instead of overflowing.
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_FUTURE.min(timeout)))
            .unwrap_or(now);
        Deadline(at)
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(instant)
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn instant(&self) -> Instant {
        self.0
    }
}

/// Outcome of a wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// Result of a single poll call, including the interrupted case that the
/// public functions absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Ready,
    TimedOut,
    Interrupted,
}

#[derive(Debug, Clone, Copy)]
enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn events(self) -> libc::c_short {
        match self {
            Interest::Readable => libc::POLLIN,
            Interest::Writable => libc::POLLOUT,
        }
    }
}

/// Block until `handle` is readable or the deadline passes.
///
/// Hang-up and error conditions count as ready: the following read reports
/// end-of-stream or the error itself.
pub fn wait_readable<H: AsRawFd>(handle: &H, deadline: Deadline) -> io::Result<Readiness> {
    wait_for(handle.as_raw_fd(), Interest::Readable, deadline)
}

/// Block until `handle` is writable or the deadline passes.
pub fn wait_writable<H: AsRawFd>(handle: &H, deadline: Deadline) -> io::Result<Readiness> {
    wait_for(handle.as_raw_fd(), Interest::Writable, deadline)
}

fn wait_for(fd: RawFd, interest: Interest, deadline: Deadline) -> io::Result<Readiness> {
    loop {
        match poll_once(fd, interest, deadline.remaining())? {
            PollOutcome::Ready => return Ok(Readiness::Ready),
            PollOutcome::TimedOut => {
                // poll rounds to whole milliseconds; only report a timeout
                // once the deadline itself is behind us.
                if deadline.has_elapsed() {
                    return Ok(Readiness::TimedOut);
                }
            }
            PollOutcome::Interrupted => {}
        }
    }
}

fn poll_once(fd: RawFd, interest: Interest, remaining: Duration) -> io::Result<PollOutcome> {
    let mut pfd = libc::pollfd {
        fd,
        events: interest.events(),
        revents: 0,
    };

    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_millis(remaining)) };

    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(PollOutcome::Interrupted);
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(PollOutcome::TimedOut);
    }
    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    Ok(PollOutcome::Ready)
}

/// Convert to a poll timeout, rounding up so a sub-millisecond remainder
/// still blocks instead of spinning.
fn timeout_millis(remaining: Duration) -> libc::c_int {
    let millis = remaining.as_micros().div_ceil(1000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_timeout_millis_rounds_up() {
        assert_eq!(timeout_millis(Duration::ZERO), 0);
        assert_eq!(timeout_millis(Duration::from_micros(1)), 1);
        assert_eq!(timeout_millis(Duration::from_millis(250)), 250);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn test_huge_timeout_is_clamped() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.has_elapsed());
        assert!(deadline.remaining() > Duration::from_secs(365 * 24 * 60 * 60));

        let deadline = Deadline::after(Duration::from_secs_f64(1e19));
        assert!(!deadline.has_elapsed());
    }

    #[test]
    fn test_deadline_remaining_never_negative() {
        let deadline = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(deadline.has_elapsed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_readable_times_out_without_data() {
        let (a, _b) = UnixStream::pair().unwrap();
        let start = Instant::now();
        let outcome = wait_readable(&a, Deadline::after(Duration::from_millis(50))).unwrap();
        assert_eq!(outcome, Readiness::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    /// Signals landing mid-wait are absorbed and the deadline still holds.
    #[cfg(target_os = "linux")]
    #[test]
    fn test_wait_survives_signals() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        extern "C" fn ignore_signal(_: libc::c_int) {}

        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as usize;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut()), 0);
        }

        let (a, _b) = UnixStream::pair().unwrap();
        let waiter = unsafe { libc::pthread_self() };
        let done = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&done);
        let interrupter = std::thread::spawn(move || {
            let mut sent = 0;
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(20));
                if !stop.load(Ordering::Relaxed) {
                    unsafe { libc::pthread_kill(waiter, libc::SIGUSR1) };
                    sent += 1;
                }
            }
            sent
        });

        let start = Instant::now();
        let outcome = wait_readable(&a, Deadline::after(Duration::from_millis(400)));
        let elapsed = start.elapsed();
        done.store(true, Ordering::Relaxed);
        let sent = interrupter.join().unwrap();

        assert_eq!(outcome.unwrap(), Readiness::TimedOut);
        assert!(elapsed >= Duration::from_millis(400), "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
        assert!(sent > 0);
    }

    #[test]
    fn test_readable_when_data_pending() {
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();
        let outcome = wait_readable(&a, Deadline::after(Duration::from_secs(1))).unwrap();
        assert_eq!(outcome, Readiness::Ready);
    }

    #[test]
    fn test_readable_on_peer_close() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let outcome = wait_readable(&a, Deadline::after(Duration::from_secs(1))).unwrap();
        assert_eq!(outcome, Readiness::Ready);
    }

    #[test]
    fn test_fresh_socket_is_writable() {
        let (a, _b) = UnixStream::pair().unwrap();
        let outcome = wait_writable(&a, Deadline::after(Duration::from_secs(1))).unwrap();
        assert_eq!(outcome, Readiness::Ready);
    }
}
