//! Health file for the host daemon.
//!
//! Supervisors read this file to see that the listener is up and where it
//! listens. It is written at startup, refreshed on demand and removed on
//! graceful shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::atomic::write_private;

/// Contents of the health file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub pid: u32,
    /// Time of the last write
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    /// Absent when the socket transport is disabled
    pub socket_path: Option<PathBuf>,
    pub log_path: PathBuf,
}

impl HealthStatus {
    pub fn new(started_at: DateTime<Utc>, socket_path: Option<PathBuf>, log_path: PathBuf) -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now(),
            started_at,
            socket_path,
            log_path,
        }
    }
}

/// Owns the health file path and cleans it up.
#[derive(Debug)]
pub struct HealthFile {
    path: PathBuf,
}

impl HealthFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `status` atomically with owner-only permissions.
    pub fn write(&self, status: &HealthStatus) -> io::Result<()> {
        let mut status = status.clone();
        status.timestamp = Utc::now();
        let bytes = serde_json::to_vec_pretty(&status)?;
        write_private(&self.path, &bytes)?;
        debug!("Health file written to {}", self.path.display());
        Ok(())
    }

    pub fn read(&self) -> io::Result<HealthStatus> {
        let bytes = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove the file. A file that is already gone is fine.
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed health file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove health file {}: {}", self.path.display(), e),
        }
    }
}
