//! borg-style archive engine implementation

use crate::config::EngineConfig;
use crate::engine::{ArchiveEngine, CreateReport};
use crate::error::Result;
use crate::types::{EngineStatus, RetentionPolicy};
use crate::ui;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Engine client invoking the configured borg-compatible binary.
///
/// Stdout/stderr are inherited so hours-long creates stream straight
/// to the console instead of deadlocking on a full pipe buffer.
pub struct BorgEngine {
    bin: String,
    compression: String,
    filter: String,
    one_file_system: bool,
    files_cache: String,
    lock_wait: u32,
}

impl BorgEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            bin: config.bin.clone(),
            compression: config.compression.clone(),
            filter: config.filter.clone(),
            one_file_system: config.one_file_system,
            files_cache: config.files_cache.clone(),
            lock_wait: config.lock_wait,
        }
    }

    /// Run the engine with non-interactive credential handling and
    /// return its exit code
    fn run(&self, args: &[String], passfile: &Path) -> Result<i32> {
        ui::cmd(&format!("{} {}", self.bin, args.join(" ")));
        let status = Command::new(&self.bin)
            .args(args)
            .env(
                "BORG_PASSCOMMAND",
                format!("cat {}", passfile.display()),
            )
            .env("BORG_FILES_CACHE", &self.files_cache)
            .env("BORG_LOCK_WAIT", self.lock_wait.to_string())
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl ArchiveEngine for BorgEngine {
    fn create(
        &self,
        repo: &Path,
        passfile: &Path,
        sources: &[PathBuf],
        excludes: &[String],
        prefix: &str,
        comment: &str,
    ) -> Result<CreateReport> {
        let archive = archive_name(prefix);

        let mut args = vec![
            "create".to_string(),
            "--verbose".to_string(),
            "--stats".to_string(),
            "--show-rc".to_string(),
            "--list".to_string(),
            "--filter".to_string(),
            self.filter.clone(),
            "--compression".to_string(),
            self.compression.clone(),
        ];
        if self.one_file_system {
            args.push("--one-file-system".to_string());
        }
        args.push("--comment".to_string());
        args.push(comment.to_string());
        for exclude in excludes {
            args.push("--exclude".to_string());
            args.push(exclude.clone());
        }
        args.push(format!("{}::{}", repo.display(), archive));
        for source in sources {
            args.push(source.display().to_string());
        }

        ui::info(&format!(
            "Creating archive: {}::{}",
            repo.display(),
            archive
        ));
        let code = self.run(&args, passfile)?;
        Ok(CreateReport {
            archive,
            status: EngineStatus::from_exit_code(code),
        })
    }

    fn prune(
        &self,
        repo: &Path,
        passfile: &Path,
        prefix: &str,
        retention: &RetentionPolicy,
    ) -> Result<EngineStatus> {
        let args = vec![
            "prune".to_string(),
            "--verbose".to_string(),
            "--stats".to_string(),
            "--show-rc".to_string(),
            "--prefix".to_string(),
            format!("{prefix}-"),
            "--keep-daily".to_string(),
            retention.keep_daily.to_string(),
            "--keep-weekly".to_string(),
            retention.keep_weekly.to_string(),
            "--keep-monthly".to_string(),
            retention.keep_monthly.to_string(),
            repo.display().to_string(),
        ];

        ui::info(&format!(
            "Pruning archives with prefix '{prefix}-' in {}",
            repo.display()
        ));
        let code = self.run(&args, passfile)?;
        Ok(EngineStatus::from_exit_code(code))
    }

    fn compact(&self, repo: &Path, passfile: &Path) -> Result<EngineStatus> {
        let args = vec![
            "compact".to_string(),
            "--progress".to_string(),
            repo.display().to_string(),
        ];

        ui::info(&format!("Compacting repository: {}", repo.display()));
        let code = self.run(&args, passfile)?;
        Ok(EngineStatus::from_exit_code(code))
    }
}

/// Archive names are `{prefix}-{UTC timestamp}`, minute resolution
fn archive_name(prefix: &str) -> String {
    format!("{}-{}", prefix, Utc::now().format("%Y-%m-%d_%H-%M"))
}
