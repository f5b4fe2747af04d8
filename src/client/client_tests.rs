// Test suite for the client module
// Socket client error surfacing against misbehaving listeners, and the
// broadcast fallback race against a scripted responder.

use crate::client::{FallbackClient, ReplySource, ReplyTarget, SocketClient};
use crate::config::ClientConfig;
use crate::error::SocketError;
use crate::notify::{Broadcaster, DatagramBroadcaster};
use crate::protocol::{CONTROL_CHANNEL, Command, Request};
use crate::transport::FramedChannel;
use crate::utils::atomic::write_private;
use serde_json::Value;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

fn client_for(path: &Path, read_timeout: Duration) -> SocketClient {
    SocketClient::new(
        ClientConfig::default()
            .with_socket_path(path)
            .with_timeouts(Duration::from_millis(500), read_timeout),
    )
}

/// Accept one connection, read the request, wait, then answer with `reply`.
fn scripted_listener(path: &Path, reply: &'static [u8], delay: Duration) -> thread::JoinHandle<()> {
    let listener = UnixListener::bind(path).unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut channel = FramedChannel::from_stream(stream).unwrap();
        let _ = channel.read_to_end(Duration::from_secs(5));
        thread::sleep(delay);
        let _ = channel.send_all(reply);
        channel.close();
    })
}

// Tests for the socket client
#[cfg(test)]
mod socket_client_tests {
    use super::*;

    /// A listener slower than the read timeout yields ReadTimeout
    #[test]
    fn test_read_timeout_against_slow_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.sock");
        let server = scripted_listener(&path, b"{\"displays\":[]}", Duration::from_secs(2));

        let client = client_for(&path, Duration::from_millis(200));
        let start = Instant::now();
        let result = client.list();
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(SocketError::ReadTimeout(_))), "got {result:?}");
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
        // The listener finishes its late write against a closed peer without hanging.
        server.join().unwrap();
    }

    /// Half a payload followed by close is InvalidJson
    #[test]
    fn test_truncated_response_is_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.sock");
        let server = scripted_listener(&path, b"{\"result\":\"crea", Duration::ZERO);

        let result = client_for(&path, Duration::from_secs(1)).list();
        assert!(matches!(result, Err(SocketError::InvalidJson(_))), "got {result:?}");
        server.join().unwrap();
    }

    /// Close without any bytes is a failed read, not a parse error
    #[test]
    fn test_empty_response_is_read_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.sock");
        let server = scripted_listener(&path, b"", Duration::ZERO);

        match client_for(&path, Duration::from_secs(1)).list() {
            Err(SocketError::ReadFailed(msg)) => assert!(msg.contains("without a response")),
            other => panic!("Expected ReadFailed, got {other:?}"),
        }
        server.join().unwrap();
    }

    /// No socket file at all is ConnectionRefused
    #[test]
    fn test_missing_listener_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let result = client_for(&dir.path().join("none.sock"), Duration::from_secs(1)).ping();
        match result {
            Err(e) => assert!(e.is_unreachable(), "got {e:?}"),
            Ok(info) => panic!("Expected an error, got {info:?}"),
        }
    }

    /// A timed-out exchange closes its connection; the listener's late write
    /// then hits a closed peer instead of a lingering descriptor
    #[test]
    fn test_read_timeout_releases_connection() {
        use std::io::{self, Read, Write};
        use std::sync::mpsc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let (timed_out_tx, timed_out_rx) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).unwrap();
            timed_out_rx.recv().unwrap();
            stream.write_all(b"{\"displays\":[]}")
        });

        let result = client_for(&path, Duration::from_millis(100)).list();
        assert!(matches!(result, Err(SocketError::ReadTimeout(_))), "got {result:?}");
        timed_out_tx.send(()).unwrap();

        let late = server.join().unwrap();
        assert_eq!(late.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    /// Timeouts far beyond the clock's range are clamped, not a panic
    #[test]
    fn test_huge_timeouts_do_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let huge = Duration::try_from_secs_f64(1e19).unwrap();
        let client = SocketClient::new(
            ClientConfig::default()
                .with_socket_path(dir.path().join("none.sock"))
                .with_timeouts(huge, huge),
        );
        match client.list() {
            Err(e) => assert!(e.is_unreachable(), "got {e:?}"),
            Ok(response) => panic!("Expected an error, got {response:?}"),
        }
    }

    /// Well-formed answers parse into the response envelope
    #[test]
    fn test_parses_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.sock");
        let server = scripted_listener(
            &path,
            br#"{"displays":[{"id":1000,"name":"A","width":800,"height":600,"refreshRate":60.0}]}"#,
            Duration::ZERO,
        );

        let response = client_for(&path, Duration::from_secs(1)).list().unwrap();
        let displays = response.displays.unwrap();
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].width, 800);
        server.join().unwrap();
    }
}

/// Client settings pointing every fallback path into `dir`.
fn fallback_config(dir: &Path, timeout: Duration) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.notify_dir = dir.join("notify");
    config.reply_dir = dir.to_path_buf();
    config.fallback_timeout = timeout;
    config
}

/// Answer one posted request through the file and/or broadcast path.
fn scripted_responder(
    notify_dir: &Path,
    file_body: Option<&'static [u8]>,
    broadcast_body: Option<&'static [u8]>,
) -> thread::JoinHandle<Value> {
    let broadcaster = DatagramBroadcaster::new(notify_dir);
    let subscription = broadcaster.subscribe(CONTROL_CHANNEL).unwrap();
    thread::spawn(move || {
        let payload = subscription
            .recv_timeout(Duration::from_secs(3))
            .unwrap()
            .expect("request was never posted");
        let request: Value = serde_json::from_slice(&payload).unwrap();

        if let Some(body) = file_body {
            let path = PathBuf::from(request["replyFile"].as_str().unwrap());
            write_private(&path, body).unwrap();
        }
        if let Some(body) = broadcast_body {
            broadcaster
                .post(request["replyTo"].as_str().unwrap(), body)
                .unwrap();
        }
        request
    })
}

// Tests for the broadcast fallback
#[cfg(test)]
mod fallback_tests {
    use super::*;

    const FILE_REPLY: &[u8] = b"{\"result\":\"removed\",\"displayID\":1}";
    const BROADCAST_REPLY: &[u8] = b"{\"result\":\"removed\",\"displayID\":2}";

    /// Derived names carry the same uuid
    #[test]
    fn test_reply_target_names() {
        let target = ReplyTarget::generate(Path::new("/tmp"));
        let suffix = target
            .channel
            .strip_prefix("com.deskpad.displaycontrol.response.")
            .unwrap();
        assert_eq!(
            target.file,
            PathBuf::from(format!("/tmp/deskpad_response_{}.json", suffix))
        );
        assert_ne!(target, ReplyTarget::generate(Path::new("/tmp")));
    }

    /// With both replies available the file is preferred
    #[async_std::test]
    async fn test_file_wins_tie() {
        let dir = tempfile::tempdir().unwrap();
        let config = fallback_config(dir.path(), Duration::from_secs(1));
        let responder =
            scripted_responder(&config.notify_dir, Some(FILE_REPLY), Some(BROADCAST_REPLY));

        let client = FallbackClient::new(config.clone());
        let target = ReplyTarget::generate(&config.reply_dir);
        let reply = client
            .request_with(Request::new(Command::Remove { display_id: 1 }), target.clone())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.source, ReplySource::File);
        assert_eq!(reply.response.display_id, Some(1));

        let request = responder.join().unwrap();
        assert_eq!(request["command"], "remove");
        assert_eq!(request["replyTo"], target.channel.as_str());

        // Both private resources are gone afterwards.
        assert!(!target.file.exists());
        assert!(!config.notify_dir.join(&target.channel).exists());
    }

    /// A broadcast-only answer is accepted
    #[async_std::test]
    async fn test_broadcast_only_reply() {
        let dir = tempfile::tempdir().unwrap();
        let config = fallback_config(dir.path(), Duration::from_secs(1));
        let responder = scripted_responder(&config.notify_dir, None, Some(BROADCAST_REPLY));

        let reply = FallbackClient::new(config)
            .request(Request::new(Command::List))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.source, ReplySource::Broadcast);
        assert_eq!(reply.response.display_id, Some(2));
        responder.join().unwrap();
    }

    /// A file-only answer is accepted
    #[async_std::test]
    async fn test_file_only_reply() {
        let dir = tempfile::tempdir().unwrap();
        let config = fallback_config(dir.path(), Duration::from_secs(1));
        let responder = scripted_responder(&config.notify_dir, Some(FILE_REPLY), None);

        let reply = FallbackClient::new(config)
            .request(Request::new(Command::List))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.source, ReplySource::File);
        responder.join().unwrap();
    }

    /// Nobody answering is a timeout, not an error
    #[async_std::test]
    async fn test_no_reply_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let config = fallback_config(dir.path(), Duration::from_millis(200));

        let start = Instant::now();
        let reply = FallbackClient::new(config)
            .request(Request::new(Command::Ping))
            .await
            .unwrap();

        assert!(reply.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
