//! delta-backup CLI - deduplicating delta backups for a libvirt host

use clap::{Parser, Subcommand};
use delta_backup::{
    BackupRunController, BorgEngine, Config, DomainReport, QemuImgInspector, Result, RunSummary,
    VirshHypervisor,
};
use delta_backup::ui;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "delta-backup")]
#[command(about = "Deduplicating delta backups for a libvirt host", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/delta-backup.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Full run: host backup, VM backups, retention (default)
    Run,

    /// Back up the host filesystem and extra paths only
    Host,

    /// Back up libvirt domains only
    Vms,

    /// Prune both repositories per the retention policy
    Prune,

    /// Reclaim free space in both repositories
    Compact,
}

fn print_domain(report: &DomainReport) {
    let mode = report
        .mode
        .map_or_else(|| "-".to_string(), |mode| mode.to_string());
    let line = format!(
        "{:<20} {:<22} mode: {}",
        report.domain, report.outcome, mode
    );
    if report.failed() {
        ui::error(&line);
    } else {
        ui::success(&line);
    }
    for violation in &report.violations {
        ui::error(&format!("  violation: {violation}"));
    }
}

fn print_summary(summary: &RunSummary) {
    ui::section("SUMMARY");
    if summary.domains.is_empty() && summary.warnings.is_empty() {
        ui::info("Nothing to report.");
    }
    for report in &summary.domains {
        print_domain(report);
    }
    for warning in &summary.warnings {
        ui::warn(warning);
    }
}

fn run() -> Result<RunSummary> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let hypervisor = VirshHypervisor::new();
    let inspector = QemuImgInspector::new();
    let engine = BorgEngine::new(&config.engine);
    let controller = BackupRunController::new(&config, &hypervisor, &inspector, &engine);

    match cli.command {
        None | Some(Commands::Run) => controller.run(),
        Some(Commands::Host) => controller.run_host(),
        Some(Commands::Vms) => controller.run_vms(),
        Some(Commands::Prune) => controller.run_prune(),
        Some(Commands::Compact) => controller.run_compact(),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(summary) => {
            print_summary(&summary);
            if summary.failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            ui::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
