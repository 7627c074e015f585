//! delta-backup: deduplicating delta backups for a libvirt host
//!
//! Backs up the host filesystem and every libvirt domain into
//! borg-style repositories. Active domains are captured through
//! disk-only external snapshots: consistency is negotiated per domain
//! (guest-agent quiesce when available, a brief pause otherwise), the
//! frozen base images are archived, and the overlay deltas are merged
//! back with an active block-commit and pivot.
//!
//! External tools (`virsh`, `qemu-img`, the archive engine) sit
//! behind traits so the pipeline can be driven against fakes in
//! tests.

pub mod config;
pub mod consistency;
pub mod engine;
pub mod error;
pub mod hypervisor;
pub mod image;
pub mod lock;
pub mod merge;
pub mod run;
pub mod snapshot;
pub mod types;
pub mod ui;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use engine::{ArchiveEngine, BorgEngine};
pub use error::{Error, Result};
pub use hypervisor::{Hypervisor, VirshHypervisor};
pub use image::{ImageInspector, QemuImgInspector};
pub use run::BackupRunController;
pub use types::{DomainName, DomainReport, DomainState, RunSummary};
