//! Merge-back of snapshot overlays
//!
//! Commits overlay deltas into their base images, pivots the domain
//! back onto the bases, and removes leftover overlay files. Each
//! target is committed independently; there is no cross-target
//! transaction.

use crate::hypervisor::Hypervisor;
use crate::types::DomainName;
use crate::ui;
use std::fs;
use std::path::PathBuf;

pub struct MergeCoordinator<'a, H: Hypervisor + ?Sized> {
    hypervisor: &'a H,
}

impl<'a, H: Hypervisor + ?Sized> MergeCoordinator<'a, H> {
    pub fn new(hypervisor: &'a H) -> Self {
        Self { hypervisor }
    }

    /// Block-commit each target with active+pivot. A failure on one
    /// target is logged and does not stop the remaining targets.
    /// Returns the warnings collected.
    pub fn commit_and_pivot(&self, domain: &DomainName, targets: &[String]) -> Vec<String> {
        let mut warnings = Vec::new();
        for target in targets {
            ui::info(&format!("Committing overlay of {domain}:{target} into its base"));
            if let Err(e) = self.hypervisor.block_commit(domain, target) {
                let msg = format!("block-commit failed for {domain}:{target}: {e}");
                ui::warn(&msg);
                warnings.push(msg);
            }
        }
        warnings
    }

    /// Best-effort unlink of overlay files. The hypervisor usually
    /// removes them after a successful pivot, so absence is normal.
    /// Returns the paths that still exist afterwards (leaked).
    pub fn cleanup_overlays(&self, overlays: &[PathBuf]) -> Vec<PathBuf> {
        let mut leaked = Vec::new();
        for path in overlays {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    ui::warn(&format!(
                        "Could not remove overlay {}: {e}",
                        path.display()
                    ));
                }
            }
            if path.exists() {
                leaked.push(path.clone());
            }
        }
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockHypervisor;
    use crate::types::DomainState;
    use std::fs;

    #[test]
    fn commit_continues_past_a_failing_target() {
        let mut hv = MockHypervisor::new();
        let web = hv.add_domain("web01", DomainState::Running);
        hv.set_fail_commit(true);

        let merge = MergeCoordinator::new(&hv);
        let warnings =
            merge.commit_and_pivot(&web, &["vda".to_string(), "vdb".to_string()]);

        assert_eq!(hv.commit_targets(&web), vec!["vda", "vdb"]);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn cleanup_removes_existing_overlays() {
        let dir = tempfile::tempdir().unwrap();
        let ov = dir.path().join("ov.qcow2");
        fs::write(&ov, b"ov").unwrap();
        let gone = dir.path().join("already-gone.qcow2");

        let hv = MockHypervisor::new();
        let merge = MergeCoordinator::new(&hv);
        let leaked = merge.cleanup_overlays(&[ov.clone(), gone]);

        assert!(leaked.is_empty());
        assert!(!ov.exists());
    }
}
