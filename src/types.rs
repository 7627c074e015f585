//! Core types for delta-backup

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A libvirt domain name (opaque, unique per host)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainName(String);

impl DomainName {
    /// Create a new domain name from a string
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.is_empty() {
            return Err("Domain name cannot be empty".to_string());
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(format!(
                "Domain name cannot contain '/' or whitespace: '{}'",
                name
            ));
        }
        Ok(DomainName(name))
    }

    /// Get the domain name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DomainName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainName::new(s)
    }
}

/// Power state of a domain as reported by the hypervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainState {
    Running,
    Idle,
    Paused,
    Blocked,
    ShutOff,
    PmSuspended,
    InShutdown,
    Crashed,
    /// Hypervisor call failed or output was unrecognized
    Unknown,
}

impl DomainState {
    /// Parse `virsh domstate` output. Unrecognized text degrades to
    /// `Unknown` rather than failing.
    pub fn parse(s: &str) -> DomainState {
        match s.trim().to_lowercase().as_str() {
            "running" => DomainState::Running,
            "idle" => DomainState::Idle,
            "paused" => DomainState::Paused,
            "blocked" => DomainState::Blocked,
            "shut off" => DomainState::ShutOff,
            "pmsuspended" => DomainState::PmSuspended,
            "in shutdown" => DomainState::InShutdown,
            "crashed" => DomainState::Crashed,
            _ => DomainState::Unknown,
        }
    }

    /// Whether the domain is live on the host in some form
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DomainState::Running
                | DomainState::Idle
                | DomainState::Blocked
                | DomainState::Paused
                | DomainState::PmSuspended
                | DomainState::InShutdown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainState::Running => "running",
            DomainState::Idle => "idle",
            DomainState::Paused => "paused",
            DomainState::Blocked => "blocked",
            DomainState::ShutOff => "shut off",
            DomainState::PmSuspended => "pmsuspended",
            DomainState::InShutdown => "in shutdown",
            DomainState::Crashed => "crashed",
            DomainState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry from the hypervisor's block-device report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// Target device name inside the guest (e.g. "vda")
    pub target: String,
    /// Backing file path on the host
    pub source: PathBuf,
}

impl BlockDevice {
    pub fn new(target: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
        }
    }
}

/// How consistency was achieved for a domain's backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyMode {
    /// Guest agent flushed filesystems before the snapshot
    Quiesced,
    /// Domain was briefly paused around the snapshot
    Paused,
    /// Domain was inactive; disks archived directly
    Cold,
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsistencyMode::Quiesced => "quiesced",
            ConsistencyMode::Paused => "paused",
            ConsistencyMode::Cold => "cold",
        };
        write!(f, "{}", s)
    }
}

/// Archive engine exit status. Only `Failed` is an error to callers;
/// the engine reserves exit code 1 for success-with-warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Success,
    SuccessWithWarnings,
    Failed(i32),
}

impl EngineStatus {
    pub fn from_exit_code(code: i32) -> EngineStatus {
        match code {
            0 => EngineStatus::Success,
            1 => EngineStatus::SuccessWithWarnings,
            c => EngineStatus::Failed(c),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EngineStatus::Failed(_))
    }
}

/// Retention policy applied by `prune`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
}

/// Backup sources for one domain after backing-chain resolution
#[derive(Debug, Clone, Default)]
pub struct ResolvedDisks {
    /// Base images to archive, first-seen order, deduplicated
    pub bases: Vec<PathBuf>,
    /// Overlay files created by the snapshot, first-seen order
    pub overlays: Vec<PathBuf>,
    /// Target devices that gained an overlay (block-commit targets)
    pub targets: Vec<String>,
    /// No backing file resolved; `bases` holds the overlay paths
    /// themselves and restore semantics differ
    pub degraded: bool,
}

/// Final status of one domain's backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainOutcome {
    Succeeded,
    SucceededWithWarnings,
    /// No disks to archive; nothing was attempted
    Skipped,
    Failed,
}

impl fmt::Display for DomainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DomainOutcome::Succeeded => "succeeded",
            DomainOutcome::SucceededWithWarnings => "succeeded (warnings)",
            DomainOutcome::Skipped => "skipped",
            DomainOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Per-domain record aggregated into the run summary
#[derive(Debug, Clone)]
pub struct DomainReport {
    pub domain: DomainName,
    pub outcome: DomainOutcome,
    pub mode: Option<ConsistencyMode>,
    /// Name of the archive created for this domain, if any
    pub archive: Option<String>,
    pub warnings: Vec<String>,
    /// Overlay files that could not be removed
    pub leaked_overlays: Vec<PathBuf>,
    /// Invariant violations: silent data-consistency risk, never
    /// reported as a clean success
    pub violations: Vec<String>,
}

impl DomainReport {
    pub fn new(domain: DomainName) -> Self {
        Self {
            domain,
            outcome: DomainOutcome::Failed,
            mode: None,
            archive: None,
            warnings: Vec::new(),
            leaked_overlays: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Whether this domain makes the run exit non-zero
    pub fn failed(&self) -> bool {
        self.outcome == DomainOutcome::Failed || !self.violations.is_empty()
    }
}

/// Aggregated result of one backup run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub domains: Vec<DomainReport>,
    /// Run-level warnings (host backup, retention, compact)
    pub warnings: Vec<String>,
}

impl RunSummary {
    /// True if any domain failed or violated an invariant
    pub fn failed(&self) -> bool {
        self.domains.iter().any(DomainReport::failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_name_rejects_empty_and_whitespace() {
        assert!(DomainName::new("").is_err());
        assert!(DomainName::new("web 01").is_err());
        assert!(DomainName::new("a/b").is_err());
        assert_eq!(DomainName::new("web01").unwrap().name(), "web01");
    }

    #[test]
    fn state_parse_known_values() {
        assert_eq!(DomainState::parse("running"), DomainState::Running);
        assert_eq!(DomainState::parse(" Running \n"), DomainState::Running);
        assert_eq!(DomainState::parse("shut off"), DomainState::ShutOff);
        assert_eq!(DomainState::parse("in shutdown"), DomainState::InShutdown);
        assert_eq!(DomainState::parse("pmsuspended"), DomainState::PmSuspended);
        assert_eq!(DomainState::parse("paused"), DomainState::Paused);
    }

    #[test]
    fn state_parse_degrades_to_unknown() {
        assert_eq!(DomainState::parse(""), DomainState::Unknown);
        assert_eq!(DomainState::parse("error: no domain"), DomainState::Unknown);
        assert_eq!(DomainState::parse("suspended?"), DomainState::Unknown);
    }

    #[test]
    fn active_states() {
        for state in [
            DomainState::Running,
            DomainState::Idle,
            DomainState::Blocked,
            DomainState::Paused,
            DomainState::PmSuspended,
            DomainState::InShutdown,
        ] {
            assert!(state.is_active(), "{state} should be active");
        }
        for state in [
            DomainState::ShutOff,
            DomainState::Crashed,
            DomainState::Unknown,
        ] {
            assert!(!state.is_active(), "{state} should be inactive");
        }
    }

    #[test]
    fn engine_status_from_exit_code() {
        assert_eq!(EngineStatus::from_exit_code(0), EngineStatus::Success);
        assert_eq!(
            EngineStatus::from_exit_code(1),
            EngineStatus::SuccessWithWarnings
        );
        assert_eq!(EngineStatus::from_exit_code(2), EngineStatus::Failed(2));
        assert!(EngineStatus::from_exit_code(2).is_failure());
        assert!(!EngineStatus::from_exit_code(1).is_failure());
    }

    #[test]
    fn report_failure_includes_violations() {
        let mut report = DomainReport::new(DomainName::new("web01").unwrap());
        report.outcome = DomainOutcome::Succeeded;
        assert!(!report.failed());
        report.violations.push("left paused".to_string());
        assert!(report.failed());
    }
}
