//! Configuration Module
//!
//! This module provides constants and default configurations for the DeskPad
//! listener and its clients. The host daemon reads an optional TOML file and
//! then applies environment overrides; clients are configured in code or by
//! command-line flags.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DaemonError, Result};

/// Constants for default settings
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/deskpad.sock";
pub const DEFAULT_LOG_PATH: &str = "/tmp/deskpad-listener.log";
pub const DEFAULT_HEALTH_PATH: &str = "/tmp/deskpad-listener.health";
pub const DEFAULT_NOTIFY_DIR: &str = "/tmp/deskpad-notify";
pub const DEFAULT_REPLY_DIR: &str = "/tmp";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/deskpad/deskpadd.toml";

/// Client timeouts, in seconds
pub const DEFAULT_CONNECT_TIMEOUT: f64 = 0.5;
pub const DEFAULT_READ_TIMEOUT: f64 = 1.0;

/// Fallback path: total wait and reply-file poll interval
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_REPLY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Listener per-connection timeouts
pub const DEFAULT_DAEMON_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DAEMON_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum request size accepted by the listener (1MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// First id handed out by a fresh display registry
pub const DEFAULT_FIRST_DISPLAY_ID: u32 = 1000;

/// Environment variables recognised by the host daemon
pub const ENV_SOCKET_PATH: &str = "DESKPAD_SOCKET_PATH";
pub const ENV_LOG_PATH: &str = "DESKPAD_LOG_PATH";
pub const ENV_HEALTH_PATH: &str = "DESKPAD_HEALTH_PATH";
pub const ENV_NOTIFY_DIR: &str = "DESKPAD_NOTIFY_DIR";

/// Client-side settings: where to connect and how long to wait.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Directory holding the named broadcast endpoints
    pub notify_dir: PathBuf,
    /// Directory where private reply files are created
    pub reply_dir: PathBuf,
    pub fallback_timeout: Duration,
    pub reply_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            connect_timeout: Duration::from_secs_f64(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Duration::from_secs_f64(DEFAULT_READ_TIMEOUT),
            notify_dir: PathBuf::from(DEFAULT_NOTIFY_DIR),
            reply_dir: PathBuf::from(DEFAULT_REPLY_DIR),
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
            reply_poll_interval: DEFAULT_REPLY_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }
}

/// Host daemon settings. Every field is optional in the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub log_path: PathBuf,
    pub health_path: PathBuf,
    pub notify_dir: PathBuf,
    /// Serve requests over the Unix socket
    pub socket_enabled: bool,
    /// Serve requests posted on the broadcast control channel
    pub broadcast_enabled: bool,
    /// Seconds allowed for a client to deliver its whole request
    pub read_timeout: f64,
    /// Seconds allowed for writing a response back
    pub write_timeout: f64,
    pub max_message_size: usize,
    pub first_display_id: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            health_path: PathBuf::from(DEFAULT_HEALTH_PATH),
            notify_dir: PathBuf::from(DEFAULT_NOTIFY_DIR),
            socket_enabled: true,
            broadcast_enabled: true,
            read_timeout: DEFAULT_DAEMON_READ_TIMEOUT.as_secs_f64(),
            write_timeout: DEFAULT_DAEMON_WRITE_TIMEOUT.as_secs_f64(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            first_display_id: DEFAULT_FIRST_DISPLAY_ID,
        }
    }
}

impl DaemonConfig {
    /// Parse a TOML document, filling every missing key with its default.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file if it exists, defaults otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(DaemonError::Config(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply `DESKPAD_*` overrides. The lookup is injected so tests do not
    /// have to touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_SOCKET_PATH) {
            self.socket_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_LOG_PATH) {
            self.log_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_HEALTH_PATH) {
            self.health_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_NOTIFY_DIR) {
            self.notify_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if positive_seconds(self.read_timeout).is_none() {
            return Err(DaemonError::Config(format!(
                "read_timeout must be a positive number of seconds, got {}",
                self.read_timeout
            )));
        }
        if positive_seconds(self.write_timeout).is_none() {
            return Err(DaemonError::Config(format!(
                "write_timeout must be a positive number of seconds, got {}",
                self.write_timeout
            )));
        }
        if self.max_message_size == 0 {
            return Err(DaemonError::Config("max_message_size must be non-zero".into()));
        }
        if !self.socket_enabled && !self.broadcast_enabled {
            return Err(DaemonError::Config(
                "at least one of socket_enabled or broadcast_enabled must be true".into(),
            ));
        }
        Ok(())
    }

    /// Falls back to the default when the value did not pass [`validate`](Self::validate).
    pub fn read_timeout(&self) -> Duration {
        positive_seconds(self.read_timeout).unwrap_or(DEFAULT_DAEMON_READ_TIMEOUT)
    }

    pub fn write_timeout(&self) -> Duration {
        positive_seconds(self.write_timeout).unwrap_or(DEFAULT_DAEMON_WRITE_TIMEOUT)
    }
}

/// `secs` as a non-zero duration, if it is one.
pub fn positive_seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}
