//! Consistency negotiation
//!
//! Chooses between guest-agent quiesce and a brief hypervisor pause,
//! per domain and per run. The pause window blocks all guest I/O, so
//! resume happens immediately after the snapshot call returns, and a
//! scoped guard guarantees it on every other exit path.

use crate::config::VmConfig;
use crate::hypervisor::Hypervisor;
use crate::types::{ConsistencyMode, DomainName, DomainState};
use crate::ui;
use std::thread;
use std::time::Duration;

/// Per-run consistency negotiator
pub struct Negotiator<'a, H: Hypervisor + ?Sized> {
    hypervisor: &'a H,
    agent_timeout: Duration,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl<'a, H: Hypervisor + ?Sized> Negotiator<'a, H> {
    pub fn new(hypervisor: &'a H, vm: &VmConfig) -> Self {
        Self {
            hypervisor,
            agent_timeout: vm.agent_timeout(),
            poll_interval: vm.pause_poll_interval(),
            poll_attempts: vm.pause_poll_attempts,
        }
    }

    /// Probe the guest agent and choose a strategy. Availability is
    /// probed fresh each run, never cached.
    pub fn negotiate(&self, domain: &DomainName) -> ConsistencyMode {
        if self.hypervisor.probe_guest_agent(domain, self.agent_timeout) {
            ui::info(&format!(
                "Guest agent available for '{domain}'; using quiesced snapshot"
            ));
            ConsistencyMode::Quiesced
        } else {
            ui::info(&format!(
                "No guest agent for '{domain}'; pausing around the snapshot"
            ));
            ConsistencyMode::Paused
        }
    }

    /// Suspend the domain, poll for a confirmed pause, and return a
    /// guard that resumes it on drop. An unconfirmed pause is a
    /// warning, not an error: the snapshot proceeds regardless.
    pub fn pause(&self, domain: &DomainName) -> crate::error::Result<PauseGuard<'a, H>> {
        self.hypervisor.suspend(domain)?;

        let mut confirmed = false;
        for _ in 0..self.poll_attempts {
            if self.hypervisor.state(domain) == DomainState::Paused {
                confirmed = true;
                break;
            }
            thread::sleep(self.poll_interval);
        }
        if !confirmed {
            ui::warn(&format!(
                "Could not confirm pause of '{domain}'; snapshotting anyway"
            ));
        }

        Ok(PauseGuard {
            hypervisor: self.hypervisor,
            domain: domain.clone(),
            resumed: false,
        })
    }
}

/// Scoped pause: the domain is resumed when the guard drops, so no
/// exit path leaves it paused beyond the snapshot call
pub struct PauseGuard<'a, H: Hypervisor + ?Sized> {
    hypervisor: &'a H,
    domain: DomainName,
    resumed: bool,
}

impl<H: Hypervisor + ?Sized> PauseGuard<'_, H> {
    /// Resume now, surfacing the error. The guard will not resume
    /// again on drop, so resume is issued exactly once either way.
    pub fn release(mut self) -> crate::error::Result<()> {
        self.resumed = true;
        self.hypervisor.resume(&self.domain)
    }
}

impl<H: Hypervisor + ?Sized> Drop for PauseGuard<'_, H> {
    fn drop(&mut self) {
        if !self.resumed {
            if let Err(e) = self.hypervisor.resume(&self.domain) {
                ui::warn(&format!("Failed to resume '{}': {}", self.domain, e));
            }
        }
    }
}
