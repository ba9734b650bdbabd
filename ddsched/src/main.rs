/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use ddsched::config::SystemConfig;
use ddsched::hyperperiod::hyperperiod_ms;
use ddsched::system::System;

/// Hyperperiods covered by a run when `--run-ms` is not given.
const DEFAULT_RUN_HYPERPERIODS: u64 = 4;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Deadline-driven scheduler simulation.
///
/// Example:
///   ddsched -c ddsched.yaml -r 6000 -a 1200
#[derive(Debug, Parser)]
#[command(
    name = "ddsched",
    about = "EDF scheduling engine on a fixed-priority substrate",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML system configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// How long to run, in milliseconds (default: four hyperperiods).
    #[arg(short = 'r', long = "run-ms")]
    run_ms: Option<u64>,

    /// Fire every aperiodic release signal at this cadence, in milliseconds.
    #[arg(short = 'a', long = "aperiodic-every-ms")]
    aperiodic_every_ms: Option<u64>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("ddsched starting up...");

    let cli = Cli::parse();

    // ── Load configuration ────────────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => match SystemConfig::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load system configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using default task set");
            SystemConfig::default()
        }
    };

    let run_ms = match (cli.run_ms, hyperperiod_ms(&config)) {
        (Some(ms), _) => ms,
        (None, Ok(h)) => h.saturating_mul(DEFAULT_RUN_HYPERPERIODS),
        (None, Err(e)) => {
            error!("Cannot derive a run length ({e}); pass --run-ms");
            process::exit(1);
        }
    };

    info!(
        tasks = config.tasks.len(),
        run_ms,
        aperiodic_every_ms = ?cli.aperiodic_every_ms,
        "Configuration"
    );
    for t in &config.tasks {
        info!(
            "  [{id}]  {kind:?}  unit={unit}  period={period:?}ms  deadline={deadline}ms  exec={exec}ms",
            id = t.task_id,
            kind = t.kind,
            unit = t.unit,
            period = t.period_ms,
            deadline = t.relative_deadline_ms,
            exec = t.execution_ms,
        );
    }

    // ── Run ───────────────────────────────────────────────────────────────────
    let system = match System::start(&config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start scheduler: {:#}", e);
            process::exit(1);
        }
    };

    let deadline = tokio::time::sleep(Duration::from_millis(run_ms));
    tokio::pin!(deadline);

    let mut aperiodic = cli
        .aperiodic_every_ms
        .filter(|&ms| ms > 0)
        .map(|ms| tokio::time::interval(Duration::from_millis(ms)));

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Run length reached");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = tick(&mut aperiodic) => system.trigger_all(),
            _ = system.engine_exited() => {
                error!("Scheduling engine stopped before the run ended");
                break;
            }
        }
    }

    // ── Report ────────────────────────────────────────────────────────────────
    let report = match system.shutdown().await {
        Ok(r) => r,
        Err(e) => {
            error!("Shutdown failed: {:#}", e);
            process::exit(1);
        }
    };

    for g in &report.generators {
        info!(task_id = %g.task_id, released = g.released, skipped = g.skipped, "generator");
    }
    for u in &report.units {
        info!(task_id = %u.task_id, finished = u.finished, abandoned = u.abandoned, "execution unit");
    }

    match report.engine {
        Ok(engine) => {
            let s = &engine.stats;
            info!(
                released = s.released,
                completed = s.completed,
                overdue = s.overdue,
                stale_completions = s.stale_completions,
                duplicate_releases = s.duplicate_releases,
                units_in_use = s.units_in_use,
                snapshots = s.snapshots_published,
                reclaimed = s.reclaimed,
                active = engine.active,
                "Final engine report"
            );
        }
        Err(e) => {
            error!("Scheduling engine halted: {e}");
            process::exit(1);
        }
    }
}

/// Next aperiodic tick, or never when no cadence was requested.
async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}
