//! Hypervisor trait and implementations
//!
//! All hypervisor interaction goes through this trait so the backup
//! pipeline can run against an in-memory fake in tests.

mod virsh;

pub use virsh::VirshHypervisor;

use crate::error::Result;
use crate::types::{BlockDevice, DomainName, DomainState};
use std::time::Duration;

/// Interface to the external hypervisor control process
pub trait Hypervisor {
    /// All domains known to the hypervisor, including inactive ones,
    /// in report order. An empty listing is valid.
    fn list_domains(&self) -> Result<Vec<DomainName>>;

    /// Current power state. A failed or unparseable query degrades to
    /// `DomainState::Unknown`; it never fails.
    fn state(&self, domain: &DomainName) -> DomainState;

    /// Probe the guest agent with a liveness command. Any failure
    /// (timeout, missing channel, missing agent) yields `false`.
    fn probe_guest_agent(&self, domain: &DomainName, timeout: Duration) -> bool;

    /// Ordered (target, source) pairs for the domain's file-backed
    /// disks. Non-absolute or non-existent sources are dropped.
    fn block_devices(&self, domain: &DomainName) -> Result<Vec<BlockDevice>>;

    /// Pause all guest vCPUs
    fn suspend(&self, domain: &DomainName) -> Result<()>;

    /// Resume a paused domain
    fn resume(&self, domain: &DomainName) -> Result<()>;

    /// Create an external, disk-only, atomic snapshot. With `quiesce`
    /// the guest agent flushes filesystems first.
    fn snapshot_create(&self, domain: &DomainName, name: &str, quiesce: bool) -> Result<()>;

    /// Fold overlay writes for one target back into its base image and
    /// pivot the domain onto the base (synchronous)
    fn block_commit(&self, domain: &DomainName, target: &str) -> Result<()>;
}
