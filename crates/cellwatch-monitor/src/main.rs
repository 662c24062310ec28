//! `cellwatch` — watch directories of workbooks and audit cell-level changes.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cellwatch_monitor::builder::BaselineBuilder;
use cellwatch_monitor::config::MonitorConfig;
use cellwatch_monitor::stop::StopFlag;
use cellwatch_monitor::watch::Monitor;
use cellwatch_store::BuildProgress;

#[derive(Parser)]
#[command(
    name = "cellwatch",
    about = "Watch spreadsheet documents and audit semantic cell changes."
)]
struct Args {
    /// Path to a JSON configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the startup baseline build and go straight to monitoring.
    #[arg(long)]
    skip_baseline_build: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MonitorConfig::default(),
    };

    info!("cellwatch v{} starting", env!("CARGO_PKG_VERSION"));
    for root in &config.watch_dirs {
        info!(root = %root.display(), "configured watch root");
    }
    info!(
        baseline_dir = %config.baseline_dir.display(),
        cache = config.use_local_cache,
        timeout = config.enable_timeout,
        memory_monitor = config.enable_memory_monitor,
        resume = config.enable_resume,
        "configuration"
    );

    let stop = StopFlag::new();
    install_signal_handler(stop.clone())?;

    if !args.skip_baseline_build {
        let targets = config.collect_targets();
        info!(files = targets.len(), "startup baseline scan");

        let builder = BaselineBuilder::new(&config, stop.clone());
        let summary = builder.run(&targets, config.scan_all_mode, prompt_resume);
        if !summary.completed_cleanly {
            // Interrupted build: progress is on disk, shut down gracefully.
            info!("baseline build interrupted, state preserved");
            return Ok(());
        }
    }

    if stop.is_stopped() {
        return Ok(());
    }

    let monitor = Monitor::new(config, stop);
    monitor.run().context("monitor initialisation")?;
    Ok(())
}

fn install_signal_handler(stop: StopFlag) -> Result<()> {
    let signals = Arc::new(AtomicUsize::new(0));
    ctrlc::set_handler(move || {
        let seen = signals.fetch_add(1, Ordering::SeqCst);
        if seen == 0 {
            warn!("interrupt received, stopping gracefully (press again to force quit)");
            stop.trigger();
        } else {
            std::process::exit(130);
        }
    })
    .context("installing signal handler")
}

/// Ask the operator whether to continue from a recorded build position.
fn prompt_resume(progress: &BuildProgress) -> bool {
    print!(
        "Found progress from {} ({}/{} files done). Resume? (y/n): ",
        progress.timestamp, progress.completed, progress.total
    );
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("y")
}
