//! Typed configuration loaded once at startup and passed by reference
//! into each component. Every recognized option has a type, a default
//! where one makes sense, and a validation rule applied at load time.

use crate::error::{Error, Result};
use crate::types::RetentionPolicy;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, deserialized from a TOML file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub vm: VmConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Repositories and credential sources
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Root directory holding the repositories
    pub backup_root: PathBuf,
    /// Refuse to run unless `backup_root` is a mountpoint
    #[serde(default)]
    pub require_mountpoint: bool,
    /// Repository for host filesystem archives
    pub host_repo: PathBuf,
    /// Repository for VM disk archives
    pub vm_repo: PathBuf,
    /// Passfile for the host repository, read by the engine itself
    pub host_passfile: PathBuf,
    /// Passfile for the VM repository, read by the engine itself
    pub vm_passfile: PathBuf,
}

/// Settings for the external archive engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine binary (e.g. borg)
    pub bin: String,
    /// Engine-native compression string
    pub compression: String,
    /// File listing filter for verbose output
    pub filter: String,
    /// Restrict archives to one filesystem
    pub one_file_system: bool,
    /// Files cache mode handed to the engine
    pub files_cache: String,
    /// Seconds the engine waits for its repository lock
    pub lock_wait: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bin: "borg".to_string(),
            compression: "zstd,6".to_string(),
            filter: "AME".to_string(),
            one_file_system: true,
            files_cache: "ctime,size,inode".to_string(),
            lock_wait: 120,
        }
    }
}

/// Host filesystem backup settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Exclude patterns for the root filesystem archive
    pub excludes: Vec<String>,
    /// Additional paths archived separately, one archive each
    pub extra_paths: Vec<PathBuf>,
    /// Prefix used for extra-path archives ({host}-{prefix}-{index})
    #[serde(default = "default_extra_prefix")]
    pub extra_prefix: String,
}

fn default_extra_prefix() -> String {
    "extra".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            excludes: Vec::new(),
            extra_paths: Vec::new(),
            extra_prefix: default_extra_prefix(),
        }
    }
}

/// Retention policy and space reclamation toggles
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub enable_prune: bool,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub enable_compact: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enable_prune: false,
            keep_daily: 7,
            keep_weekly: 4,
            keep_monthly: 6,
            enable_compact: false,
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_daily: self.keep_daily,
            keep_weekly: self.keep_weekly,
            keep_monthly: self.keep_monthly,
        }
    }
}

/// Live VM backup tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Guest agent probe timeout
    pub agent_timeout_secs: u64,
    /// Sleep between pause-confirmation polls
    pub pause_poll_interval_ms: u64,
    /// Pause-confirmation polls before proceeding unconfirmed
    pub pause_poll_attempts: u32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: 5,
            pause_poll_interval_ms: 500,
            pause_poll_attempts: 10,
        }
    }
}

impl VmConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }
}

/// Run-level settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Lock file serializing whole runs
    pub lock_file: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from("/run/delta-backup.lock"),
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Config> {
        if !path.is_file() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid values eagerly, before any domain is touched
    pub fn validate(&self) -> Result<()> {
        if !self.repository.backup_root.is_absolute() {
            return Err(Error::Config(format!(
                "backup_root must be an absolute path: {}",
                self.repository.backup_root.display()
            )));
        }
        for (path, key) in [
            (&self.repository.host_repo, "host_repo"),
            (&self.repository.vm_repo, "vm_repo"),
            (&self.repository.host_passfile, "host_passfile"),
            (&self.repository.vm_passfile, "vm_passfile"),
        ] {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(format!("{key} must not be empty")));
            }
        }
        if self.engine.bin.trim().is_empty() {
            return Err(Error::Config("engine.bin must not be empty".to_string()));
        }
        if self.vm.pause_poll_attempts == 0 {
            return Err(Error::Config(
                "vm.pause_poll_attempts must be at least 1".to_string(),
            ));
        }
        if self.run.lock_file.as_os_str().is_empty() {
            return Err(Error::Config("run.lock_file must not be empty".to_string()));
        }
        Ok(())
    }
}
