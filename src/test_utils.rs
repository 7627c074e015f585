//! In-memory fakes for the external collaborators
//!
//! Scripted hypervisor, image inspector, and archive engine used by
//! the unit and integration tests; they record every call so tests
//! can assert on ordering-sensitive properties like resume-once.

use crate::config::{Config, RepositoryConfig, RunConfig, VmConfig};
use crate::engine::{ArchiveEngine, CreateReport};
use crate::error::{Error, Result};
use crate::hypervisor::Hypervisor;
use crate::image::ImageInspector;
use crate::types::{BlockDevice, DomainName, DomainState, EngineStatus, RetentionPolicy};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Build a block device entry
pub fn dev(target: &str, source: impl Into<PathBuf>) -> BlockDevice {
    BlockDevice::new(target, source)
}

/// A configuration rooted in a scratch directory, with poll timings
/// collapsed so tests run instantly
pub fn test_config(root: &Path) -> Config {
    Config {
        repository: RepositoryConfig {
            backup_root: root.to_path_buf(),
            require_mountpoint: false,
            host_repo: root.join("host-repo"),
            vm_repo: root.join("vm-repo"),
            host_passfile: root.join("host.pass"),
            vm_passfile: root.join("vm.pass"),
        },
        engine: Default::default(),
        host: Default::default(),
        retention: Default::default(),
        vm: VmConfig {
            agent_timeout_secs: 1,
            pause_poll_interval_ms: 0,
            pause_poll_attempts: 5,
        },
        run: RunConfig {
            lock_file: root.join("run.lock"),
        },
    }
}

/// Scripted hypervisor. Block-device listings are served per domain
/// from a queue: each call pops the next mapping, and the last one
/// repeats once the queue is down to a single entry.
#[derive(Default)]
pub struct MockHypervisor {
    domains: Vec<DomainName>,
    agents: HashMap<DomainName, bool>,
    confirm_pause: bool,
    fail_snapshot: bool,
    fail_resume: bool,
    fail_commit: bool,
    fail_block_devices_after: Option<u32>,
    block_device_calls: Cell<u32>,
    states: RefCell<HashMap<DomainName, DomainState>>,
    block_maps: RefCell<HashMap<DomainName, VecDeque<Vec<BlockDevice>>>>,
    suspends: RefCell<HashMap<DomainName, u32>>,
    resumes: RefCell<HashMap<DomainName, u32>>,
    probes: RefCell<HashMap<DomainName, u32>>,
    snapshots: RefCell<HashMap<DomainName, Vec<(String, bool)>>>,
    commits: RefCell<HashMap<DomainName, Vec<String>>>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self {
            confirm_pause: true,
            ..Default::default()
        }
    }

    /// Register a domain in listing order and set its initial state
    pub fn add_domain(&mut self, name: &str, state: DomainState) -> DomainName {
        let domain = DomainName::new(name).expect("valid test domain name");
        self.domains.push(domain.clone());
        self.states.borrow_mut().insert(domain.clone(), state);
        domain
    }

    pub fn set_agent(&mut self, domain: &DomainName, available: bool) {
        self.agents.insert(domain.clone(), available);
    }

    /// Whether `suspend` actually transitions the domain to Paused
    pub fn set_confirm_pause(&mut self, confirm: bool) {
        self.confirm_pause = confirm;
    }

    pub fn set_fail_snapshot(&mut self, fail: bool) {
        self.fail_snapshot = fail;
    }

    pub fn set_fail_resume(&mut self, fail: bool) {
        self.fail_resume = fail;
    }

    pub fn set_fail_commit(&mut self, fail: bool) {
        self.fail_commit = fail;
    }

    /// Fail `block_devices` once more than `calls` lookups have been
    /// served, across all domains
    pub fn set_fail_block_devices_after(&mut self, calls: u32) {
        self.fail_block_devices_after = Some(calls);
    }

    /// Queue the next block-device listing for a domain
    pub fn push_block_map(&mut self, domain: &DomainName, devices: Vec<BlockDevice>) {
        self.block_maps
            .borrow_mut()
            .entry(domain.clone())
            .or_default()
            .push_back(devices);
    }

    pub fn suspend_count(&self, domain: &DomainName) -> u32 {
        self.suspends.borrow().get(domain).copied().unwrap_or(0)
    }

    pub fn resume_count(&self, domain: &DomainName) -> u32 {
        self.resumes.borrow().get(domain).copied().unwrap_or(0)
    }

    pub fn probe_count(&self, domain: &DomainName) -> u32 {
        self.probes.borrow().get(domain).copied().unwrap_or(0)
    }

    pub fn snapshot_count(&self, domain: &DomainName) -> usize {
        self.snapshots
            .borrow()
            .get(domain)
            .map_or(0, |calls| calls.len())
    }

    /// Quiesce flag of the most recent snapshot request
    pub fn last_snapshot_quiesced(&self, domain: &DomainName) -> Option<bool> {
        self.snapshots
            .borrow()
            .get(domain)
            .and_then(|calls| calls.last().map(|(_, quiesce)| *quiesce))
    }

    pub fn commit_targets(&self, domain: &DomainName) -> Vec<String> {
        self.commits.borrow().get(domain).cloned().unwrap_or_default()
    }

    fn bump(map: &RefCell<HashMap<DomainName, u32>>, domain: &DomainName) {
        *map.borrow_mut().entry(domain.clone()).or_insert(0) += 1;
    }
}

impl Hypervisor for MockHypervisor {
    fn list_domains(&self) -> Result<Vec<DomainName>> {
        Ok(self.domains.clone())
    }

    fn state(&self, domain: &DomainName) -> DomainState {
        self.states
            .borrow()
            .get(domain)
            .copied()
            .unwrap_or(DomainState::Unknown)
    }

    fn probe_guest_agent(&self, domain: &DomainName, _timeout: Duration) -> bool {
        Self::bump(&self.probes, domain);
        self.agents.get(domain).copied().unwrap_or(false)
    }

    fn block_devices(&self, domain: &DomainName) -> Result<Vec<BlockDevice>> {
        let calls = self.block_device_calls.get() + 1;
        self.block_device_calls.set(calls);
        if matches!(self.fail_block_devices_after, Some(limit) if calls > limit) {
            return Err(Error::CommandFailed {
                command: format!("virsh domblklist {domain}"),
                stderr: "injected listing failure".to_string(),
            });
        }
        let mut maps = self.block_maps.borrow_mut();
        match maps.get_mut(domain) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
            Some(queue) => Ok(queue.front().cloned().unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    fn suspend(&self, domain: &DomainName) -> Result<()> {
        Self::bump(&self.suspends, domain);
        if self.confirm_pause {
            self.states
                .borrow_mut()
                .insert(domain.clone(), DomainState::Paused);
        }
        Ok(())
    }

    fn resume(&self, domain: &DomainName) -> Result<()> {
        Self::bump(&self.resumes, domain);
        if self.fail_resume {
            return Err(Error::CommandFailed {
                command: format!("virsh resume {domain}"),
                stderr: "injected resume failure".to_string(),
            });
        }
        self.states
            .borrow_mut()
            .insert(domain.clone(), DomainState::Running);
        Ok(())
    }

    fn snapshot_create(&self, domain: &DomainName, name: &str, quiesce: bool) -> Result<()> {
        self.snapshots
            .borrow_mut()
            .entry(domain.clone())
            .or_default()
            .push((name.to_string(), quiesce));
        if self.fail_snapshot {
            return Err(Error::CommandFailed {
                command: format!("virsh snapshot-create-as {domain}"),
                stderr: "injected snapshot failure".to_string(),
            });
        }
        Ok(())
    }

    fn block_commit(&self, domain: &DomainName, target: &str) -> Result<()> {
        self.commits
            .borrow_mut()
            .entry(domain.clone())
            .or_default()
            .push(target.to_string());
        if self.fail_commit {
            return Err(Error::CommandFailed {
                command: format!("virsh blockcommit {domain} {target}"),
                stderr: "injected commit failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Scripted image inspector: a map from image path to backing path
#[derive(Default)]
pub struct MockInspector {
    backings: HashMap<PathBuf, PathBuf>,
}

impl MockInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_backing(&mut self, image: impl Into<PathBuf>, backing: impl Into<PathBuf>) {
        self.backings.insert(image.into(), backing.into());
    }
}

impl ImageInspector for MockInspector {
    fn backing_file(&self, image: &Path) -> Result<Option<PathBuf>> {
        Ok(self.backings.get(image).cloned())
    }
}

/// One recorded archive creation
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub repo: PathBuf,
    pub passfile: PathBuf,
    pub sources: Vec<PathBuf>,
    pub excludes: Vec<String>,
    pub prefix: String,
    pub comment: String,
}

/// Scripted archive engine
pub struct MockEngine {
    status: Cell<EngineStatus>,
    counter: Cell<u32>,
    creates: RefCell<Vec<CreateCall>>,
    prunes: RefCell<Vec<(PathBuf, String)>>,
    compacts: RefCell<Vec<PathBuf>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            status: Cell::new(EngineStatus::Success),
            counter: Cell::new(0),
            creates: RefCell::new(Vec::new()),
            prunes: RefCell::new(Vec::new()),
            compacts: RefCell::new(Vec::new()),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit status returned by subsequent `create` calls
    pub fn set_status(&mut self, status: EngineStatus) {
        self.status.set(status);
    }

    pub fn creates(&self) -> Vec<CreateCall> {
        self.creates.borrow().clone()
    }

    pub fn prunes(&self) -> Vec<(PathBuf, String)> {
        self.prunes.borrow().clone()
    }

    pub fn compact_count(&self) -> usize {
        self.compacts.borrow().len()
    }
}

impl ArchiveEngine for MockEngine {
    fn create(
        &self,
        repo: &Path,
        passfile: &Path,
        sources: &[PathBuf],
        excludes: &[String],
        prefix: &str,
        comment: &str,
    ) -> Result<CreateReport> {
        self.creates.borrow_mut().push(CreateCall {
            repo: repo.to_path_buf(),
            passfile: passfile.to_path_buf(),
            sources: sources.to_vec(),
            excludes: excludes.to_vec(),
            prefix: prefix.to_string(),
            comment: comment.to_string(),
        });
        let n = self.counter.get();
        self.counter.set(n + 1);
        Ok(CreateReport {
            archive: format!("{prefix}-archive{n}"),
            status: self.status.get(),
        })
    }

    fn prune(
        &self,
        repo: &Path,
        _passfile: &Path,
        prefix: &str,
        _retention: &RetentionPolicy,
    ) -> Result<EngineStatus> {
        self.prunes
            .borrow_mut()
            .push((repo.to_path_buf(), prefix.to_string()));
        Ok(EngineStatus::Success)
    }

    fn compact(&self, repo: &Path, _passfile: &Path) -> Result<EngineStatus> {
        self.compacts.borrow_mut().push(repo.to_path_buf());
        Ok(EngineStatus::Success)
    }
}
