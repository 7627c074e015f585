//! Archive engine trait and implementations
//!
//! The engine is an opaque external service: we hand it sources and a
//! credential source, and interpret nothing but its exit code.

mod borg;

pub use borg::BorgEngine;

use crate::error::Result;
use crate::types::{EngineStatus, RetentionPolicy};
use std::path::{Path, PathBuf};

/// Result of an archive creation
#[derive(Debug, Clone)]
pub struct CreateReport {
    /// Full archive name, `{prefix}-{timestamp}`
    pub archive: String,
    pub status: EngineStatus,
}

/// Interface to the external deduplicating archive engine
pub trait ArchiveEngine {
    /// Create a `{prefix}-{timestamp}` archive in `repo` from
    /// `sources`. The passfile is read by the engine process itself;
    /// no secret passes through our arguments or logs.
    fn create(
        &self,
        repo: &Path,
        passfile: &Path,
        sources: &[PathBuf],
        excludes: &[String],
        prefix: &str,
        comment: &str,
    ) -> Result<CreateReport>;

    /// Prune archives matching `{prefix}-` per the retention policy
    fn prune(
        &self,
        repo: &Path,
        passfile: &Path,
        prefix: &str,
        retention: &RetentionPolicy,
    ) -> Result<EngineStatus>;

    /// Reclaim free space in the repository
    fn compact(&self, repo: &Path, passfile: &Path) -> Result<EngineStatus>;
}
