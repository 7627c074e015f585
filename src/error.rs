//! Error types for delta-backup

use crate::types::DomainName;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for delta-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a backup run
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Another run is active (lock: {0})")]
    LockHeld(PathBuf),

    #[error("Command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Snapshot creation failed for domain '{domain}': {detail}")]
    SnapshotFailed { domain: DomainName, detail: String },

    #[error("Snapshot of '{domain}' succeeded but the new disk layout could not be read: {detail}")]
    OverlayUnaccounted {
        domain: DomainName,
        /// Targets from the pre-snapshot mapping, for merging the
        /// domain off the overlay that now backs them
        targets: Vec<String>,
        detail: String,
    },

    #[error("No block devices found for domain '{0}'")]
    NoDisks(DomainName),

    #[error("Permission denied: must run as root")]
    PermissionDenied,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
