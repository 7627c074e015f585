//! virsh-backed hypervisor implementation

use crate::error::{Error, Result};
use crate::hypervisor::Hypervisor;
use crate::types::{BlockDevice, DomainName, DomainState};
use crate::ui;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const GUEST_PING: &str = r#"{"execute":"guest-ping"}"#;

/// Hypervisor implementation driving the `virsh` control process.
///
/// Every call is synchronous and text-output; parsing is defensive,
/// degrading to empty/unknown results rather than failing on
/// unexpected text.
pub struct VirshHypervisor {
    bin: String,
}

impl VirshHypervisor {
    pub fn new() -> Self {
        Self {
            bin: "virsh".to_string(),
        }
    }

    /// Run virsh and return stdout
    fn run(&self, args: &[&str]) -> Result<String> {
        ui::cmd(&format!("{} {}", self.bin, args.join(" ")));
        let output = Command::new(&self.bin).args(args).output()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(Error::CommandFailed {
                command: format!("{} {}", self.bin, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }

    /// Run virsh, returning Ok(true) on success, Ok(false) on failure
    fn run_check(&self, args: &[&str]) -> Result<bool> {
        ui::cmd(&format!("{} {}", self.bin, args.join(" ")));
        let status = Command::new(&self.bin).args(args).status()?;
        Ok(status.success())
    }
}

impl Default for VirshHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypervisor for VirshHypervisor {
    fn list_domains(&self) -> Result<Vec<DomainName>> {
        let output = self.run(&["list", "--all", "--name"])?;
        Ok(parse_domain_list(&output))
    }

    fn state(&self, domain: &DomainName) -> DomainState {
        match self.run(&["domstate", domain.name()]) {
            Ok(output) => DomainState::parse(&output),
            Err(_) => DomainState::Unknown,
        }
    }

    fn probe_guest_agent(&self, domain: &DomainName, timeout: Duration) -> bool {
        let timeout_secs = timeout.as_secs().max(1).to_string();
        self.run_check(&[
            "qemu-agent-command",
            domain.name(),
            "--timeout",
            &timeout_secs,
            GUEST_PING,
        ])
        .unwrap_or(false)
    }

    fn block_devices(&self, domain: &DomainName) -> Result<Vec<BlockDevice>> {
        let output = self.run(&["domblklist", domain.name(), "--details"])?;
        Ok(parse_domblklist(&output)
            .into_iter()
            .filter(|dev| dev.source.is_absolute() && dev.source.exists())
            .collect())
    }

    fn suspend(&self, domain: &DomainName) -> Result<()> {
        self.run(&["suspend", domain.name()])?;
        Ok(())
    }

    fn resume(&self, domain: &DomainName) -> Result<()> {
        self.run(&["resume", domain.name()])?;
        Ok(())
    }

    fn snapshot_create(&self, domain: &DomainName, name: &str, quiesce: bool) -> Result<()> {
        let mut args = vec![
            "snapshot-create-as",
            domain.name(),
            "--name",
            name,
            "--disk-only",
            "--atomic",
            "--no-metadata",
        ];
        if quiesce {
            args.push("--quiesce");
        }
        self.run(&args)?;
        Ok(())
    }

    fn block_commit(&self, domain: &DomainName, target: &str) -> Result<()> {
        self.run(&[
            "blockcommit",
            domain.name(),
            target,
            "--active",
            "--pivot",
            "--wait",
        ])?;
        Ok(())
    }
}

/// Parse `virsh list --all --name` output: one name per line, blanks
/// and unusable names dropped
fn parse_domain_list(output: &str) -> Vec<DomainName> {
    output
        .lines()
        .filter_map(|line| DomainName::new(line.trim()).ok())
        .collect()
}

/// Parse `virsh domblklist --details` output. Columns are
/// `Type Device Target Source`; only `file disk` rows count. Header
/// and separator lines fall out of the column filter naturally.
fn parse_domblklist(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 4 && parts[0] == "file" && parts[1] == "disk" {
                Some(BlockDevice::new(parts[2], Path::new(parts[3]).to_path_buf()))
            } else {
                None
            }
        })
        .collect()
}
