//! Multi-SIM Daemon (multisimd)
//!
//! Keeps the persisted SIM list in step with the host. Runs a reconciliation
//! session on every scan interval, on `Trigger` requests and on SIGHUP, and
//! answers the `multisim` CLI over a Unix domain socket.
//!
//! # Signals
//! - **SIGHUP**: reload the host snapshot, then run a pass
//! - **SIGINT/SIGTERM**: remove the socket and exit
//!
//! # Hardening
//! - Restrictive umask (0077)
//! - Socket mode 0600, symlinks refused, peer uid checked
//! - Bounded message size, connection and rate limits

mod scheduler;
mod server;

use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use ms_core::{
    load_config, load_config_from, Collaborators, Coordinator, HostSnapshot, JsonSimStore,
    ReconcileConfig, SnapshotEvents, SnapshotPlatform, TracingReporter, TracingSink, Worker,
};

use scheduler::{HostPermission, SchedulerState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "MULTISIM_LOG";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    socket: Option<PathBuf>,
    store: Option<PathBuf>,
}

fn print_help() {
    eprintln!("multisimd {} - multi-SIM reconciliation daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    multisimd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH     Configuration file (default ~/.config/multisim/config.json)");
    eprintln!("    -n, --snapshot PATH   Host snapshot JSON (overrides snapshot_path)");
    eprintln!("    -s, --socket PATH     Socket path (overrides socket_path)");
    eprintln!("        --store PATH      SIM store file (overrides store_path)");
    eprintln!("    -v, --version         Print version");
    eprintln!("    -h, --help            Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    MULTISIM_LOG          Log filter (trace, debug, info, warn, error)");
}

/// Parse arguments; `Ok(None)` when help or version was printed
fn parse_args(args: &[String]) -> anyhow::Result<Option<Args>> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .map(PathBuf::from)
                .with_context(|| format!("{} requires a path argument", name))
        };
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                println!("multisimd {}", VERSION);
                return Ok(None);
            }
            "-c" | "--config" => parsed.config = Some(value("--config")?),
            "-n" | "--snapshot" => parsed.snapshot = Some(value("--snapshot")?),
            "-s" | "--socket" => parsed.socket = Some(value("--socket")?),
            "--store" => parsed.store = Some(value("--store")?),
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(Some(parsed))
}

/// Config file merged with command-line overrides
fn resolve_config(args: &Args) -> anyhow::Result<ReconcileConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    if let Some(snapshot) = &args.snapshot {
        config.snapshot_path = Some(snapshot.clone());
    }
    if let Some(socket) = &args.socket {
        config.socket_path = Some(socket.clone());
    }
    if let Some(store) = &args.store {
        config.store_path = Some(store.clone());
    }
    Ok(config)
}

fn init_logging() -> bool {
    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

/// Set restrictive umask so the store and socket are private
fn set_secure_umask() {
    // SAFETY: umask only sets the file creation mask of this process.
    unsafe { libc::umask(0o077) };
    debug!("Umask set to 0077");
}

fn cleanup(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("Failed to remove socket: {}", e);
        }
    }
    info!("Cleanup complete");
}

fn build_state(config: ReconcileConfig) -> anyhow::Result<SchedulerState> {
    let Some(snapshot_path) = config.snapshot_path.clone() else {
        bail!("No host snapshot configured (use --snapshot or snapshot_path)");
    };
    let snapshot = HostSnapshot::load(&snapshot_path)
        .with_context(|| format!("Failed to load host snapshot {}", snapshot_path.display()))?;
    info!(
        path = %snapshot_path.display(),
        slots = snapshot.slots.len(),
        sdk = snapshot.sdk_level,
        "Host snapshot loaded"
    );

    let store_path = config.resolved_store_path();
    let store = JsonSimStore::open(&store_path)
        .with_context(|| format!("Failed to open SIM store {}", store_path.display()))?;
    info!(path = %store_path.display(), "SIM store opened");

    let permission = Arc::new(HostPermission::new(snapshot.permission_granted));
    let reporter = Arc::new(TracingReporter);
    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        Collaborators {
            platform: Arc::new(SnapshotPlatform::new(snapshot)),
            permission: permission.clone(),
            store: Arc::new(store),
            sink: Arc::new(TracingSink),
            reporter: reporter.clone(),
        },
    ));
    let worker = Arc::new(Worker::new(coordinator, Arc::new(SnapshotEvents::new()), reporter));

    Ok(SchedulerState::new(worker, config, snapshot_path, permission))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(Some(args)) => args,
        Ok(None) => return Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let use_journald = init_logging();
    set_secure_umask();

    info!("STARTUP: multisimd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    let config = resolve_config(&args)?;
    let socket_path = config.resolved_socket_path();
    let state = Arc::new(build_state(config)?);

    let listener = server::bind_socket(&socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    info!("STARTUP: Listening on {}", socket_path.display());
    info!("STARTUP: PID: {}", std::process::id());

    let shutdown = Arc::new(AtomicBool::new(false));

    let socket_for_signal = socket_path.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        cleanup(&socket_for_signal);
        info!("SHUTDOWN: Daemon terminated gracefully");
        std::process::exit(0);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let hup_state = state.clone();
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(mut hangup) => {
            tokio::spawn(async move {
                while hangup.recv().await.is_some() {
                    info!("SIGNAL: Received SIGHUP");
                    hup_state.signal_reload();
                }
            });
        }
        Err(e) => warn!("SIGHUP handler unavailable: {}", e),
    }

    let scheduler_handle = tokio::spawn(scheduler::run_scheduler(state.clone(), shutdown.clone()));

    let result = server::run_server(listener, state, shutdown.clone()).await;

    shutdown.store(true, Ordering::SeqCst);
    scheduler_handle.abort();
    cleanup(&socket_path);

    if let Err(e) = result {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
