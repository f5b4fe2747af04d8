// Connection-level tests for the transport module.
// These exercise connect, framing and timeouts against a real listener bound
// in a temporary directory.

use crate::error::SocketError;
use crate::transport::FramedChannel;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("t.sock")
}

#[cfg(test)]
mod connect_tests {
    use super::*;

    #[test]
    fn test_missing_socket_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let result = FramedChannel::connect(&socket_in(&dir), Duration::from_millis(100));
        match result {
            Err(SocketError::ConnectionRefused(msg)) => assert!(msg.contains("not found")),
            Err(other) => panic!("Expected ConnectionRefused, got {other:?}"),
            Ok(_) => panic!("Expected ConnectionRefused, got a connection"),
        }
    }

    #[test]
    fn test_stale_socket_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        // Bind then drop: the file stays behind with nobody listening.
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let result = FramedChannel::connect(&path, Duration::from_millis(100));
        assert!(matches!(result, Err(SocketError::ConnectionRefused(_))));
    }

    #[test]
    fn test_no_listener_resolves_within_bound() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let result = FramedChannel::connect(&socket_in(&dir), Duration::from_millis(100));
        let elapsed = start.elapsed();

        assert!(matches!(
            result,
            Err(SocketError::ConnectionRefused(_)) | Err(SocketError::ConnectTimeout(_))
        ));
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    }

    #[test]
    fn test_path_too_long() {
        let long = PathBuf::from(format!("/tmp/{}.sock", "d".repeat(120)));
        let result = FramedChannel::connect(&long, Duration::from_millis(100));
        assert!(matches!(result, Err(SocketError::InvalidSocketPath(_))));
    }

    #[test]
    fn test_connect_to_live_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();

        let channel = FramedChannel::connect(&path, Duration::from_millis(500));
        assert!(channel.is_ok());
        drop(listener);
    }
}

#[cfg(test)]
mod exchange_tests {
    use super::*;

    /// Accept one connection, read the request to EOF, answer with `reply`.
    fn serve_once(
        listener: UnixListener,
        reply: Vec<u8>,
        delay: Duration,
    ) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = FramedChannel::from_stream(stream).unwrap();
            let request = channel.read_to_end(Duration::from_secs(5)).unwrap();
            thread::sleep(delay);
            let _ = channel.send_all(&reply);
            channel.close();
            request
        })
    }

    #[test]
    fn test_request_response_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_once(listener, b"{\"ok\":true}".to_vec(), Duration::ZERO);

        let mut channel = FramedChannel::connect(&path, Duration::from_millis(500)).unwrap();
        channel.send_all(b"{\"command\":\"ping\"}").unwrap();
        channel.half_close().unwrap();
        let response = channel.read_to_end(Duration::from_secs(1)).unwrap();
        channel.close();

        assert_eq!(response, b"{\"ok\":true}");
        assert_eq!(server.join().unwrap(), b"{\"command\":\"ping\"}");
    }

    #[test]
    fn test_read_timeout_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        let server = serve_once(listener, b"{}".to_vec(), Duration::from_millis(800));

        let mut channel = FramedChannel::connect(&path, Duration::from_millis(500)).unwrap();
        channel.send_all(b"{}").unwrap();
        channel.half_close().unwrap();

        let start = Instant::now();
        let result = channel.read_to_end(Duration::from_millis(200));
        let elapsed = start.elapsed();
        channel.close();

        assert!(matches!(result, Err(SocketError::ReadTimeout(_))));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(700), "took {elapsed:?}");
        server.join().unwrap();
    }

    #[test]
    fn test_empty_response_on_immediate_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_in(&dir);
        let listener = UnixListener::bind(&path).unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut channel = FramedChannel::connect(&path, Duration::from_millis(500)).unwrap();
        server.join().unwrap();
        let response = channel.read_to_end(Duration::from_secs(1)).unwrap();
        assert!(response.is_empty());
    }
}
