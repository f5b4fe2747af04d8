//! Unified Error Handling System
//!
//! This module defines the error types shared by the transport, the request
//! dispatcher and the host daemon. Transport failures surface to callers as
//! [`SocketError`]; dispatch failures travel back to the client inside a normal
//! response envelope as [`RequestError`]; host startup problems are
//! [`DaemonError`].

use std::io;
use thiserror::Error;

/// Errors raised by the client side of the socket transport.
///
/// Every variant carries a human readable detail. None of them hold
/// recoverable state: each one ends that single request attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("Socket creation failed: {0}")]
    SocketCreationFailed(String),

    #[error("Invalid socket path: {0}")]
    InvalidSocketPath(String),

    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Read timeout: {0}")]
    ReadTimeout(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

impl SocketError {
    /// True when no listener could be reached at all, as opposed to a
    /// listener that was reached but misbehaved.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            SocketError::ConnectionRefused(_) | SocketError::ConnectTimeout(_)
        )
    }
}

/// Describe an OS error without leaking it as a typed value.
pub(crate) fn describe_os_error(context: &str, err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(errno) => format!("{context}: {err} (errno {errno})"),
        None => format!("{context}: {err}"),
    }
}

/// Errors produced while decoding or executing a request.
///
/// These never abort a connection; they are rendered into the `error` field
/// of the response envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing command")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("display {0} not found")]
    NotFound(u32),

    #[error("display ids exhausted")]
    IdsExhausted,
}

/// Errors raised by the host daemon outside of request handling.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {path}: {source}")]
    Bind { path: String, source: io::Error },

    #[error("Signal handler error: {0}")]
    Signal(String),
}

impl From<toml::de::Error> for DaemonError {
    fn from(error: toml::de::Error) -> Self {
        DaemonError::Config(error.to_string())
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(error: serde_json::Error) -> Self {
        DaemonError::Config(error.to_string())
    }
}

/// Standardized result type for the host daemon
pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_error_display() {
        let cases = vec![
            (SocketError::SocketCreationFailed("x".into()), "Socket creation failed: x"),
            (SocketError::InvalidSocketPath("x".into()), "Invalid socket path: x"),
            (SocketError::ConnectTimeout("x".into()), "Connect timeout: x"),
            (SocketError::ConnectionRefused("x".into()), "Connection refused: x"),
            (SocketError::ConnectionFailed("x".into()), "Connection failed: x"),
            (SocketError::SendFailed("x".into()), "Send failed: x"),
            (SocketError::ReadTimeout("x".into()), "Read timeout: x"),
            (SocketError::ReadFailed("x".into()), "Read failed: x"),
            (SocketError::InvalidJson("x".into()), "Invalid JSON: x"),
            (SocketError::SerializationFailed("x".into()), "Serialization failed: x"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_unreachable_classification() {
        assert!(SocketError::ConnectionRefused(String::new()).is_unreachable());
        assert!(SocketError::ConnectTimeout(String::new()).is_unreachable());
        assert!(!SocketError::ReadTimeout(String::new()).is_unreachable());
        assert!(!SocketError::InvalidJson(String::new()).is_unreachable());
    }

    #[test]
    fn test_errno_is_only_in_description() {
        let err = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        let detail = describe_os_error("connect", &err);
        assert!(detail.starts_with("connect: "));
        assert!(detail.contains(&format!("errno {}", libc::ECONNREFUSED)));
    }

    #[test]
    fn test_request_error_messages() {
        assert_eq!(RequestError::MissingCommand.to_string(), "missing command");
        assert_eq!(
            RequestError::UnknownCommand("resize".into()).to_string(),
            "unknown command: resize"
        );
        assert_eq!(RequestError::NotFound(1007).to_string(), "display 1007 not found");
    }

    #[test]
    fn test_toml_error_conversion() {
        let result: std::result::Result<toml::Value, toml::de::Error> = toml::from_str("a = [");
        if let Err(toml_error) = result {
            match DaemonError::from(toml_error) {
                DaemonError::Config(_) => (),
                other => panic!("Expected Config error, got {other:?}"),
            }
        }
    }
}
