//! Snapshot orchestration
//!
//! Drives one domain through `Inspecting -> Negotiating ->
//! Snapshotting -> Resolved`, producing the backup sources (resolved
//! base images), the overlay files the snapshot created, and the
//! targets to block-commit afterwards. Any failure before an overlay
//! exists is terminal for the domain and skips the merge entirely.

use crate::config::VmConfig;
use crate::consistency::Negotiator;
use crate::error::{Error, Result};
use crate::hypervisor::Hypervisor;
use crate::image::ImageInspector;
use crate::types::{BlockDevice, ConsistencyMode, DomainName, ResolvedDisks};
use crate::ui;
use chrono::Utc;
use std::path::PathBuf;

/// Result of a successful snapshot pass over one domain
#[derive(Debug)]
pub struct SnapshotOutcome {
    pub mode: ConsistencyMode,
    pub snapshot_name: String,
    pub disks: ResolvedDisks,
    pub warnings: Vec<String>,
}

pub struct SnapshotOrchestrator<'a, H: Hypervisor + ?Sized, I: ImageInspector + ?Sized> {
    hypervisor: &'a H,
    inspector: &'a I,
    negotiator: Negotiator<'a, H>,
}

impl<'a, H: Hypervisor + ?Sized, I: ImageInspector + ?Sized> SnapshotOrchestrator<'a, H, I> {
    pub fn new(hypervisor: &'a H, inspector: &'a I, vm: &VmConfig) -> Self {
        Self {
            hypervisor,
            inspector,
            negotiator: Negotiator::new(hypervisor, vm),
        }
    }

    /// Snapshot one live domain and resolve its backup sources
    pub fn snapshot(&self, domain: &DomainName) -> Result<SnapshotOutcome> {
        let mut warnings = Vec::new();

        // Inspecting: capture the "before" block-device mapping
        let before = self.hypervisor.block_devices(domain)?;
        if before.is_empty() {
            return Err(Error::NoDisks(domain.clone()));
        }

        // Negotiating
        let mode = self.negotiator.negotiate(domain);
        let snapshot_name = snapshot_name(domain);

        // Snapshotting: with the pause strategy the domain is resumed
        // immediately after the snapshot call returns, success or not
        let snapshot_result = match mode {
            ConsistencyMode::Paused => {
                let guard = self.negotiator.pause(domain)?;
                let result = self.hypervisor.snapshot_create(domain, &snapshot_name, false);
                if let Err(e) = guard.release() {
                    warnings.push(format!("resume after snapshot failed: {e}"));
                }
                result
            }
            _ => self.hypervisor.snapshot_create(domain, &snapshot_name, true),
        };
        if let Err(e) = snapshot_result {
            // No overlay exists; the domain's backup is aborted here
            return Err(Error::SnapshotFailed {
                domain: domain.clone(),
                detail: e.to_string(),
            });
        }

        // Resolved: capture the "after" mapping and walk backing chains.
        // The overlay exists at this point; if it cannot be located,
        // hand the caller the pre-snapshot targets so it can merge the
        // domain off the overlay and raise an alert.
        let after = match self.hypervisor.block_devices(domain) {
            Ok(after) => after,
            Err(e) => {
                return Err(Error::OverlayUnaccounted {
                    domain: domain.clone(),
                    targets: before.iter().map(|dev| dev.target.clone()).collect(),
                    detail: e.to_string(),
                })
            }
        };
        let disks = self.resolve(domain, &before, &after, &mut warnings);

        Ok(SnapshotOutcome {
            mode,
            snapshot_name,
            disks,
            warnings,
        })
    }

    /// Resolve post-snapshot sources back to their base images.
    ///
    /// Overlays are the devices whose source changed between the two
    /// mappings. Each post-snapshot source is asked for its backing
    /// reference; relative references resolve against the overlay's
    /// directory, and bases missing from disk are excluded. Base and
    /// overlay paths are deduplicated preserving first-seen order.
    fn resolve(
        &self,
        domain: &DomainName,
        before: &[BlockDevice],
        after: &[BlockDevice],
        warnings: &mut Vec<String>,
    ) -> ResolvedDisks {
        let mut disks = ResolvedDisks::default();

        for dev in after {
            let changed = before
                .iter()
                .find(|b| b.target == dev.target)
                .map_or(true, |b| b.source != dev.source);
            if changed {
                push_unique(&mut disks.overlays, dev.source.clone());
                if !disks.targets.contains(&dev.target) {
                    disks.targets.push(dev.target.clone());
                }
            }

            match self.inspector.backing_file(&dev.source) {
                Ok(Some(backing)) => {
                    let resolved = if backing.is_relative() {
                        match dev.source.parent() {
                            Some(dir) => dir.join(&backing),
                            None => backing,
                        }
                    } else {
                        backing
                    };
                    if resolved.exists() {
                        push_unique(&mut disks.bases, resolved);
                    } else {
                        let msg = format!(
                            "backing file {} for {} does not exist; excluded",
                            resolved.display(),
                            dev.source.display()
                        );
                        ui::warn(&msg);
                        warnings.push(msg);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let msg = format!(
                        "could not read backing file of {}: {e}",
                        dev.source.display()
                    );
                    ui::warn(&msg);
                    warnings.push(msg);
                }
            }
        }

        if disks.bases.is_empty() {
            // Degraded mode: archive the overlays themselves. Restore
            // semantics differ, so this is flagged distinctly.
            let msg = format!(
                "no backing files resolved for '{domain}'; DEGRADED mode, archiving post-snapshot sources directly"
            );
            ui::warn(&msg);
            warnings.push(msg);
            disks.degraded = true;
            for dev in after {
                push_unique(&mut disks.bases, dev.source.clone());
            }
        }

        disks
    }
}

/// Generated snapshot name: `delta-{domain}-{timestamp}`
fn snapshot_name(domain: &DomainName) -> String {
    format!("delta-{}-{}", domain, Utc::now().format("%Y%m%d-%H%M%S"))
}

fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}
