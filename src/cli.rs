/*
 * This file is part of multisim.
 *
 * Copyright (C) 2025 multisim contributors
 *
 * multisim is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * multisim is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with multisim. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface
//!
//! `scan`, `list` and `present` work on the local store; `trigger` and
//! `status` go through the daemon socket.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use ms_core::{
    format_sim_line, load_config, load_config_from, Collaborators, Coordinator, ErrorReporter,
    HostSnapshot, JsonSimStore, NotificationSink, PassOutcome, ReconcileConfig, SimRecord,
    SimStore, SnapshotEvents, SnapshotPlatform, StaticPermission, TracingReporter, TracingSink,
    Worker,
};
use ms_protocol::{validate_hni, PassReport, SimSummary};

use crate::client::DaemonClient;
use crate::logger::EventLog;

#[derive(Parser, Debug)]
#[command(name = "multisim")]
#[command(version)]
#[command(about = "Multi-SIM discovery and reconciliation")]
#[command(long_about = "Multi-SIM discovery and reconciliation

Discovers the SIM cards of a multi-SIM host, keeps one canonical list keyed
by SIM serial and reports changes.

EXAMPLES:
    multisim scan --snapshot host.json     Run one pass against a host description
    multisim list                          SIMs currently in a slot
    multisim list --all                    Include removed SIMs
    multisim present 63902                 SIMs of network MCC 639 / MNC 02
    multisim trigger --wait                Ask the daemon for a pass and wait
    multisim status                        Daemon pass counters

ENVIRONMENT VARIABLES:
    MULTISIM_LOG=debug     Log filter

FILES:
    ~/.config/multisim/config.json      Reconciliation settings
    ~/.config/multisim/sims.json        Persisted SIM list
    ~/.config/multisim/logs.json        Event log (--logging)")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Daemon socket (overrides socket_path)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// SIM store file (overrides store_path)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Append events and captured errors to the JSON-lines event log
    #[arg(long, global = true)]
    pub logging: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one reconciliation pass locally
    Scan {
        /// Host snapshot JSON (overrides snapshot_path)
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Skip the settle delay after the pass
        #[arg(long)]
        no_settle: bool,
        /// Print the resulting list as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored SIMs
    List {
        /// Include removed SIMs
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },

    /// Stored SIMs in a slot that belong to a network
    Present {
        /// Home network identifier, MCC followed by MNC (e.g. 63902)
        hni: String,
        #[arg(long)]
        json: bool,
    },

    /// Ask the daemon to run a pass
    Trigger {
        /// Wait for the pass and print its result
        #[arg(long)]
        wait: bool,
    },

    /// Show daemon status
    Status,
}

/// Configuration with command-line overrides applied
pub fn resolve_config(cli: &Cli) -> anyhow::Result<ReconcileConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    if let Some(socket) = &cli.socket {
        config.socket_path = Some(socket.clone());
    }
    if let Some(store) = &cli.store {
        config.store_path = Some(store.clone());
    }
    Ok(config)
}

pub fn run_cli(cli: &Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    let config = resolve_config(cli)?;
    match &cli.command {
        Commands::Scan {
            snapshot,
            no_settle,
            json,
        } => cmd_scan(config, snapshot.as_deref(), *no_settle, *json, cli.logging, out),
        Commands::List { all, json } => cmd_list(&config, *all, *json, out),
        Commands::Present { hni, json } => cmd_present(&config, hni, *json, out),
        Commands::Trigger { wait } => cmd_trigger(&config, *wait, out),
        Commands::Status => cmd_status(&config, out),
    }
}

fn open_store(config: &ReconcileConfig) -> anyhow::Result<JsonSimStore> {
    let path = config.resolved_store_path();
    JsonSimStore::open(&path).with_context(|| format!("Failed to open SIM store {}", path.display()))
}

fn print_records(records: &[SimRecord], json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(records)?)?;
        return Ok(());
    }
    if records.is_empty() {
        writeln!(out, "No SIMs")?;
        return Ok(());
    }
    writeln!(out, "{:<8} {:<10} {:<24} {:<6} {:<6}", "SLOT", "SERIAL", "OPERATOR", "HNI", "ISO")?;
    for record in records {
        writeln!(out, "{}", format_sim_line(record))?;
    }
    Ok(())
}

fn print_summaries(sims: &[SimSummary], out: &mut dyn Write) -> anyhow::Result<()> {
    if sims.is_empty() {
        writeln!(out, "No SIMs")?;
    }
    for sim in sims {
        writeln!(out, "{}  {}", sim.display, sim.serial_digest)?;
    }
    Ok(())
}

// ============================================================================
// Local Commands
// ============================================================================

fn cmd_scan(
    mut config: ReconcileConfig,
    snapshot: Option<&Path>,
    no_settle: bool,
    json: bool,
    logging: bool,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let Some(snapshot_path) = snapshot.map(Path::to_path_buf).or_else(|| config.snapshot_path.clone()) else {
        bail!("No host snapshot given (use --snapshot or snapshot_path)");
    };
    let host = HostSnapshot::load(&snapshot_path)
        .with_context(|| format!("Failed to load host snapshot {}", snapshot_path.display()))?;
    if no_settle {
        config.settle_delay_ms = 0;
    }

    let sink: Arc<dyn NotificationSink>;
    let reporter: Arc<dyn ErrorReporter>;
    if logging {
        sink = Arc::new(EventLog);
        reporter = Arc::new(EventLog);
    } else {
        sink = Arc::new(TracingSink);
        reporter = Arc::new(TracingReporter);
    }
    let timeout = config.settle_delay() + ms_core::constants::daemon::PASS_WAIT_MARGIN;
    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        Collaborators {
            permission: Arc::new(StaticPermission(host.permission_granted)),
            platform: Arc::new(SnapshotPlatform::new(host)),
            store: Arc::new(open_store(&config)?),
            sink,
            reporter: reporter.clone(),
        },
    ));
    let worker = Worker::new(coordinator.clone(), Arc::new(SnapshotEvents::new()), reporter);

    let report = report_for(worker.run_once(timeout));
    match report {
        PassReport::Changed => writeln!(out, "SIM list changed")?,
        PassReport::Unchanged => writeln!(out, "SIM list unchanged")?,
        PassReport::Failed { retryable: false } => bail!("Pass failed (phone permission not granted)"),
        PassReport::Failed { retryable: true } => bail!("Pass failed, try again"),
        PassReport::Retry => bail!("Could not register for SIM state changes, try again"),
        PassReport::TimedOut | PassReport::Queued => bail!("Pass did not finish in time"),
    }

    print_records(&coordinator.current_sims()?, json, out)
}

/// Wire form of a session result
fn report_for(outcome: Option<PassOutcome>) -> PassReport {
    match outcome {
        Some(PassOutcome::Success { changed: true }) => PassReport::Changed,
        Some(PassOutcome::Success { changed: false }) => PassReport::Unchanged,
        Some(PassOutcome::Failure { retryable }) => PassReport::Failed { retryable },
        Some(PassOutcome::Retry) => PassReport::Retry,
        None => PassReport::TimedOut,
    }
}

fn cmd_list(config: &ReconcileConfig, all: bool, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let records = if all {
        store.get_all()?
    } else {
        store.saved_list(config.slot_count)?
    };
    print_records(&records, json, out)
}

fn cmd_present(config: &ReconcileConfig, hni: &str, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    validate_hni(hni).map_err(anyhow::Error::msg)?;
    let store = open_store(config)?;
    print_records(&store.present_by_hni(hni)?, json, out)
}

// ============================================================================
// Daemon Commands
// ============================================================================

fn connect(config: &ReconcileConfig, wait: bool) -> anyhow::Result<DaemonClient> {
    let socket = config.resolved_socket_path();
    let timeout = if wait {
        config.settle_delay() + ms_core::constants::daemon::PASS_WAIT_MARGIN
    } else {
        ms_core::constants::daemon::CLIENT_TIMEOUT
    };
    Ok(DaemonClient::connect_with_timeout(&socket, timeout)?)
}

fn cmd_trigger(config: &ReconcileConfig, wait: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut client = connect(config, wait)?;
    let report = client.trigger(wait)?;
    writeln!(out, "{}", describe_report(report))?;
    if wait && report == PassReport::Changed {
        print_summaries(&client.list_sims()?, out)?;
    }
    Ok(())
}

fn cmd_status(config: &ReconcileConfig, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut client = connect(config, false)?;
    let status = client.status()?;

    writeln!(out, "multisim Status")?;
    writeln!(out, "===============")?;
    writeln!(out)?;
    writeln!(out, "Daemon:    {}", status.version)?;
    writeln!(out, "State:     {}", status.state)?;
    writeln!(out, "Passes:    {} ({} changed, {} failed)", status.passes, status.changes, status.failures)?;
    writeln!(
        out,
        "Last pass: {}",
        status.last_report.map(describe_report).unwrap_or("none yet")
    )?;
    writeln!(out, "Interval:  {}s", status.scan_interval_secs)?;
    writeln!(out, "Slots:     {}", status.slot_count)?;
    if let Some(snapshot) = &status.snapshot_path {
        writeln!(out, "Snapshot:  {}", snapshot)?;
    }
    writeln!(out)?;
    print_summaries(&client.list_sims()?, out)
}

pub fn describe_report(report: PassReport) -> &'static str {
    match report {
        PassReport::Queued => "pass queued",
        PassReport::Unchanged => "SIM list unchanged",
        PassReport::Changed => "SIM list changed",
        PassReport::Failed { retryable: true } => "pass failed, will retry",
        PassReport::Failed { retryable: false } => "pass failed",
        PassReport::Retry => "listeners unavailable, will retry",
        PassReport::TimedOut => "pass timed out",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["multisim", "list", "--all", "--store", "/tmp/sims.json"]).unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/sims.json")));
        assert!(matches!(cli.command, Commands::List { all: true, json: false }));
    }

    #[test]
    fn test_present_requires_hni() {
        assert!(Cli::try_parse_from(["multisim", "present"]).is_err());
        let cli = Cli::try_parse_from(["multisim", "present", "63902"]).unwrap();
        assert!(matches!(cli.command, Commands::Present { ref hni, .. } if hni == "63902"));
    }

    #[test]
    fn test_report_mapping() {
        assert_eq!(report_for(None), PassReport::TimedOut);
        assert_eq!(
            report_for(Some(PassOutcome::Success { changed: false })),
            PassReport::Unchanged
        );
        assert_eq!(describe_report(PassReport::Failed { retryable: true }), "pass failed, will retry");
    }
}
