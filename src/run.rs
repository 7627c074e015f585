//! Backup run controller
//!
//! Sequences the whole run: preconditions, the exclusive run lock,
//! host and extra-path archives, the per-domain live backup pipeline,
//! the invariant sweep, and retention. One domain's failure never
//! aborts the run; it is recorded and the controller moves on.

use crate::config::Config;
use crate::engine::ArchiveEngine;
use crate::error::{Error, Result};
use crate::hypervisor::Hypervisor;
use crate::image::ImageInspector;
use crate::lock::RunLock;
use crate::merge::MergeCoordinator;
use crate::snapshot::SnapshotOrchestrator;
use crate::types::{
    ConsistencyMode, DomainName, DomainOutcome, DomainReport, DomainState, EngineStatus,
    RunSummary,
};
use crate::ui;
use nix::sys::stat::{self, Mode};
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct BackupRunController<'a, H, I, E>
where
    H: Hypervisor + ?Sized,
    I: ImageInspector + ?Sized,
    E: ArchiveEngine + ?Sized,
{
    config: &'a Config,
    hypervisor: &'a H,
    inspector: &'a I,
    engine: &'a E,
}

impl<'a, H, I, E> BackupRunController<'a, H, I, E>
where
    H: Hypervisor + ?Sized,
    I: ImageInspector + ?Sized,
    E: ArchiveEngine + ?Sized,
{
    pub fn new(config: &'a Config, hypervisor: &'a H, inspector: &'a I, engine: &'a E) -> Self {
        Self {
            config,
            hypervisor,
            inspector,
            engine,
        }
    }

    /// Full run: host backup, VM backups, retention
    pub fn run(&self) -> Result<RunSummary> {
        self.locked(|summary| {
            self.backup_host(summary);
            self.backup_domains(summary);
            self.apply_retention(summary);
        })
    }

    /// Host filesystem and extra paths only
    pub fn run_host(&self) -> Result<RunSummary> {
        self.locked(|summary| self.backup_host(summary))
    }

    /// VM backups only
    pub fn run_vms(&self) -> Result<RunSummary> {
        self.locked(|summary| self.backup_domains(summary))
    }

    /// Prune both repositories now, regardless of the enable flag
    pub fn run_prune(&self) -> Result<RunSummary> {
        self.locked(|summary| self.prune_all(summary))
    }

    /// Compact both repositories now, regardless of the enable flag
    pub fn run_compact(&self) -> Result<RunSummary> {
        self.locked(|summary| self.compact_all(summary))
    }

    /// Check preconditions, take the run lock, and do the work. The
    /// lock is released on every exit path when the guard drops.
    fn locked<F: FnOnce(&mut RunSummary)>(&self, work: F) -> Result<RunSummary> {
        self.preflight()?;
        let _lock = RunLock::acquire(&self.config.run.lock_file)?;
        let mut summary = RunSummary::default();
        work(&mut summary);
        ui::section("DONE");
        Ok(summary)
    }

    /// Fatal precondition checks, all before any domain is touched
    fn preflight(&self) -> Result<()> {
        if !nix::unistd::geteuid().is_root() {
            return Err(Error::PermissionDenied);
        }
        // Group-writable, no world access
        stat::umask(Mode::from_bits_truncate(0o007));

        let repo = &self.config.repository;
        if !repo.backup_root.is_dir() {
            return Err(Error::Config(format!(
                "Backup root not found: {}",
                repo.backup_root.display()
            )));
        }
        if repo.require_mountpoint && !is_mountpoint(&repo.backup_root)? {
            return Err(Error::Config(format!(
                "{} is not a mountpoint",
                repo.backup_root.display()
            )));
        }
        for path in [&repo.host_repo, &repo.vm_repo] {
            if !path.is_dir() {
                return Err(Error::Config(format!(
                    "Repository not found: {}",
                    path.display()
                )));
            }
        }
        for path in [&repo.host_passfile, &repo.vm_passfile] {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "Passfile not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Archive the root filesystem, then each extra path separately
    pub fn backup_host(&self, summary: &mut RunSummary) {
        ui::section("HOST DELTA BACKUP");
        let host = hostname();
        let repo = &self.config.repository;

        let sources = [PathBuf::from("/")];
        let result = self.engine.create(
            &repo.host_repo,
            &repo.host_passfile,
            &sources,
            &self.config.host.excludes,
            &host,
            &format!("Host filesystem backup ({host})"),
        );
        record_best_effort(summary, "host backup", result.map(|r| r.status));

        if self.config.host.extra_paths.is_empty() {
            ui::info("No extra paths configured (extra_paths empty).");
            return;
        }
        ui::section("EXTRA PATHS BACKUP");
        for (idx, path) in self.config.host.extra_paths.iter().enumerate() {
            if !path.exists() {
                let msg = format!("Extra path missing: {}", path.display());
                ui::warn(&msg);
                summary.warnings.push(msg);
                continue;
            }
            let prefix = format!("{host}-{}-{}", self.config.host.extra_prefix, idx + 1);
            let result = self.engine.create(
                &repo.host_repo,
                &repo.host_passfile,
                std::slice::from_ref(path),
                &[],
                &prefix,
                &format!("Extra path backup '{}' ({host})", path.display()),
            );
            record_best_effort(
                summary,
                &format!("extra path {}", path.display()),
                result.map(|r| r.status),
            );
        }
    }

    /// Back up every domain the hypervisor reports, one at a time
    pub fn backup_domains(&self, summary: &mut RunSummary) {
        ui::section("VM DELTA BACKUPS");
        let domains = match self.hypervisor.list_domains() {
            Ok(domains) => domains,
            Err(e) => {
                let msg = format!("could not list domains: {e}");
                ui::error(&msg);
                summary.warnings.push(msg);
                return;
            }
        };
        if domains.is_empty() {
            ui::info("No libvirt domains found.");
        }
        for domain in domains {
            ui::section(&format!("VM: {domain}"));
            summary.domains.push(self.backup_domain(&domain));
        }
    }

    /// Run one domain through the pipeline and sweep its invariants
    pub fn backup_domain(&self, domain: &DomainName) -> DomainReport {
        let mut report = DomainReport::new(domain.clone());
        let state_before = self.hypervisor.state(domain);
        ui::info(&format!("Domain '{domain}' is {state_before}"));

        let result = if state_before.is_active() {
            self.backup_domain_live(domain, &mut report)
        } else {
            self.backup_domain_cold(domain, &mut report)
        };
        if let Err(e) = result {
            ui::error(&format!("Backup of '{domain}' failed: {e}"));
            report.warnings.push(e.to_string());
            report.outcome = DomainOutcome::Failed;
        }

        // A domain running before the run must never be left paused,
        // whatever happened above
        if state_before.is_active()
            && state_before != DomainState::Paused
            && self.hypervisor.state(domain) == DomainState::Paused
        {
            let msg = format!("domain '{domain}' was left paused after backup; resuming");
            ui::error(&msg);
            report.violations.push(msg);
            if let Err(e) = self.hypervisor.resume(domain) {
                report
                    .violations
                    .push(format!("could not resume '{domain}': {e}"));
            }
        }

        ui::info(&format!("Domain '{domain}': {}", report.outcome));
        report
    }

    /// Inactive domain: archive its disks directly, no negotiation,
    /// no snapshot, no merge
    fn backup_domain_cold(&self, domain: &DomainName, report: &mut DomainReport) -> Result<()> {
        report.mode = Some(ConsistencyMode::Cold);
        let devices = self.hypervisor.block_devices(domain)?;
        if devices.is_empty() {
            ui::warn(&format!("No disk paths found for '{domain}'; skipping backup"));
            report.outcome = DomainOutcome::Skipped;
            return Ok(());
        }
        let sources: Vec<PathBuf> = devices.into_iter().map(|dev| dev.source).collect();
        self.archive_domain(domain, &sources, report);
        Ok(())
    }

    /// Active domain: snapshot, archive the resolved bases, then
    /// merge back and clean up
    fn backup_domain_live(&self, domain: &DomainName, report: &mut DomainReport) -> Result<()> {
        let orchestrator =
            SnapshotOrchestrator::new(self.hypervisor, self.inspector, &self.config.vm);
        let outcome = match orchestrator.snapshot(domain) {
            Ok(outcome) => outcome,
            Err(Error::NoDisks(_)) => {
                ui::warn(&format!("No disk paths found for '{domain}'; skipping backup"));
                report.outcome = DomainOutcome::Skipped;
                return Ok(());
            }
            Err(Error::OverlayUnaccounted {
                targets, detail, ..
            }) => {
                // An overlay exists but cannot be located. Nothing was
                // archived; still merge the domain off the overlay so
                // it is not left writing to an untracked file.
                let msg = format!(
                    "snapshot overlay of '{domain}' is unaccounted for \
                     (post-snapshot inspection failed: {detail})"
                );
                ui::error(&msg);
                report.violations.push(msg);
                let merge = MergeCoordinator::new(self.hypervisor);
                report
                    .warnings
                    .extend(merge.commit_and_pivot(domain, &targets));
                return Ok(());
            }
            // Snapshot failed: no overlay exists, so no merge either
            Err(e) => return Err(e),
        };
        report.mode = Some(outcome.mode);
        report.warnings.extend(outcome.warnings);

        self.archive_domain(domain, &outcome.disks.bases, report);

        // The merge always follows the engine call, whatever its exit
        // status: a domain wedged on an overlay is worse than a failed
        // archive.
        let merge = MergeCoordinator::new(self.hypervisor);
        report
            .warnings
            .extend(merge.commit_and_pivot(domain, &outcome.disks.targets));
        let leaked = merge.cleanup_overlays(&outcome.disks.overlays);
        if !leaked.is_empty() {
            let paths: Vec<String> = leaked.iter().map(|p| p.display().to_string()).collect();
            let msg = format!("overlay files leaked for '{domain}': {}", paths.join(", "));
            ui::error(&msg);
            report.violations.push(msg);
            report.leaked_overlays = leaked;
        }
        Ok(())
    }

    /// Create the VM repository archive for one domain
    fn archive_domain(&self, domain: &DomainName, sources: &[PathBuf], report: &mut DomainReport) {
        let host = hostname();
        let repo = &self.config.repository;
        let result = self.engine.create(
            &repo.vm_repo,
            &repo.vm_passfile,
            sources,
            &[],
            &format!("{host}-{domain}"),
            &format!("VM disk backup ({domain} on {host})"),
        );
        match result {
            Ok(created) => {
                report.archive = Some(created.archive);
                report.outcome = match created.status {
                    EngineStatus::Success => DomainOutcome::Succeeded,
                    EngineStatus::SuccessWithWarnings => {
                        ui::warn(&format!("engine reported warnings for '{domain}'"));
                        DomainOutcome::SucceededWithWarnings
                    }
                    EngineStatus::Failed(code) => {
                        let msg = format!("engine returned {code} for '{domain}'");
                        ui::error(&msg);
                        report.warnings.push(msg);
                        DomainOutcome::Failed
                    }
                };
            }
            Err(e) => {
                let msg = format!("archive creation failed for '{domain}': {e}");
                ui::error(&msg);
                report.warnings.push(msg);
                report.outcome = DomainOutcome::Failed;
            }
        }
    }

    /// Prune and compact per the configured policy
    pub fn apply_retention(&self, summary: &mut RunSummary) {
        if self.config.retention.enable_prune {
            self.prune_all(summary);
        } else {
            ui::info("Retention (prune) disabled.");
        }
        if self.config.retention.enable_compact {
            self.compact_all(summary);
        }
    }

    fn prune_all(&self, summary: &mut RunSummary) {
        ui::section("RETENTION");
        let host = hostname();
        let repo = &self.config.repository;
        let policy = self.config.retention.policy();

        let mut prefixes = vec![(&repo.host_repo, &repo.host_passfile, host.clone())];
        if !self.config.host.extra_paths.is_empty() {
            prefixes.push((
                &repo.host_repo,
                &repo.host_passfile,
                format!("{host}-{}", self.config.host.extra_prefix),
            ));
        }
        prefixes.push((&repo.vm_repo, &repo.vm_passfile, host.clone()));

        for (repo_path, passfile, prefix) in prefixes {
            let result = self.engine.prune(repo_path, passfile, &prefix, &policy);
            record_best_effort(summary, &format!("prune '{prefix}-'"), result);
        }
    }

    fn compact_all(&self, summary: &mut RunSummary) {
        ui::section("SPACE RECLAMATION");
        let repo = &self.config.repository;
        for (repo_path, passfile) in [
            (&repo.host_repo, &repo.host_passfile),
            (&repo.vm_repo, &repo.vm_passfile),
        ] {
            let result = self.engine.compact(repo_path, passfile);
            record_best_effort(
                summary,
                &format!("compact {}", repo_path.display()),
                result,
            );
        }
    }
}

/// Log a best-effort operation's failure and record it as a run-level
/// warning; success passes silently
fn record_best_effort(summary: &mut RunSummary, what: &str, result: Result<EngineStatus>) {
    match result {
        Ok(status) if status.is_failure() => {
            let msg = format!("{what} returned {status:?}");
            ui::warn(&msg);
            summary.warnings.push(msg);
        }
        Ok(_) => {}
        Err(e) => {
            let msg = format!("{what} failed: {e}");
            ui::warn(&msg);
            summary.warnings.push(msg);
        }
    }
}

fn is_mountpoint(path: &Path) -> Result<bool> {
    Ok(Command::new("mountpoint")
        .arg("-q")
        .arg(path)
        .status()?
        .success())
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
