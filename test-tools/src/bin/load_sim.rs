/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Manual load simulator: N concurrent generators against one engine.
//!
//! Each generator owns one task id and one execution unit and releases
//! `--releases` instances with pseudo-random deadlines.  Once every deadline
//! has passed, the three registries are queried through the snapshot feed and
//! audited.  Exits non-zero on any invariant violation.
//!
//!   cargo run -p test-tools --bin load-sim -- --generators 32 --releases 50

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use ddsched::clock::{Clock, MonotonicClock};
use ddsched::config::TaskClass;
use ddsched::engine::{Engine, EngineLimits};
use ddsched::kernel::SimKernel;
use ddsched::mailbox::{mailboxes, DeliveryPolicy, EngineHandle};
use ddsched::monitor::Monitor;
use ddsched::task::{RegistryKind, SchedRef, TaskDescriptor, TaskId, TaskKind};
use ddsched::unit::ExecutionUnit;

#[derive(Debug, Parser)]
#[command(name = "load-sim", about = "Concurrent release stress against one ddsched engine")]
struct Args {
    /// Number of concurrent generators (one task id and unit each).
    #[arg(long, default_value_t = 16)]
    generators: u32,

    /// Releases per generator.
    #[arg(long, default_value_t = 20)]
    releases: u32,

    /// Relative deadlines are drawn from 10..10+spread ms.
    #[arg(long = "spread-ms", default_value_t = 500)]
    spread_ms: u64,

    /// Engine inbox capacity.
    #[arg(long, default_value_t = 100)]
    capacity: usize,
}

/// xorshift64; good enough to scatter deadlines.
fn next_random(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

async fn generate(
    id: u32,
    releases: u32,
    spread_ms: u64,
    handle: EngineHandle,
    clock: Arc<dyn Clock>,
) -> u64 {
    let mut rng = 0x9E37_79B9_7F4A_7C15 ^ u64::from(id);
    let mut sent = 0;
    for _ in 0..releases {
        let relative = 10 + next_random(&mut rng) % spread_ms.max(1);
        let task = TaskDescriptor::new(
            TaskId(id),
            TaskKind::Aperiodic,
            SchedRef(id),
            clock.now() + relative,
        );
        if handle.release(task).await.is_ok() {
            sent += 1;
        }
        let gap = 5 + next_random(&mut rng) % (spread_ms / 4).max(1);
        tokio::time::sleep(Duration::from_millis(gap)).await;
    }
    sent
}

async fn run(args: Args) -> Result<()> {
    let kernel = Arc::new(SimKernel::new());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let (handle, inbox, feed) = mailboxes(args.capacity, 16, DeliveryPolicy::default());
    let (stop_tx, stop_rx) = watch::channel(false);

    let limits = EngineLimits {
        history_limit: usize::MAX,
        ..EngineLimits::default()
    };
    let engine = Engine::new(kernel.clone(), clock.clone(), feed.clone(), limits);
    let engine = tokio::spawn(engine.run(inbox, stop_rx.clone()));

    let mut units = Vec::new();
    let mut generators = Vec::new();
    for id in 1..=args.generators {
        let class = TaskClass::aperiodic(id, 1, 1 + u64::from(id % 20));
        let unit = ExecutionUnit::new(
            &class,
            kernel.register(class.unit),
            kernel.clone(),
            handle.clone(),
            clock.clone(),
            Duration::from_millis(1),
        );
        units.push(tokio::spawn(unit.run(stop_rx.clone())));
        generators.push(tokio::spawn(generate(
            id,
            args.releases,
            args.spread_ms,
            handle.clone(),
            clock.clone(),
        )));
    }

    let mut sent = 0;
    for g in generators {
        sent += g.await.context("generator task panicked")?;
    }
    info!(sent, "all generators finished, waiting for deadlines to pass");

    // Every outstanding deadline expires within 10 + spread_ms.
    tokio::time::sleep(Duration::from_millis(args.spread_ms + 100)).await;

    let mut monitor = Monitor::new(handle.clone(), feed.subscribe(), Duration::from_secs(1));
    if monitor.request_all() != 3 {
        bail!("engine inbox did not accept the audit queries");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.drain();

    let view = monitor.view();
    let len = |which| view.latest(which).map(|s| s.tasks.len());
    info!(
        active = ?len(RegistryKind::Active),
        completed = ?len(RegistryKind::Completed),
        overdue = ?len(RegistryKind::Overdue),
        "registries after quiescence"
    );
    view.audit().context("invariant violation in snapshots")?;
    if len(RegistryKind::Active) != Some(0) {
        bail!("active registry not empty after every deadline passed");
    }

    stop_tx.send(true).ok();
    let report = engine
        .await
        .context("engine task panicked")?
        .context("engine halted")?;
    let mut finished = 0;
    for u in units {
        finished += u.await.context("execution unit task panicked")?.finished;
    }

    let s = &report.stats;
    info!(
        sent,
        released = s.released,
        completed = s.completed,
        overdue = s.overdue,
        stale = s.stale_completions,
        duplicates = s.duplicate_releases,
        finished,
        "load-sim report"
    );

    if s.released + s.duplicate_releases + s.units_in_use != sent {
        bail!("accepted releases do not add up to releases sent");
    }
    if s.completed + s.overdue != s.released {
        bail!("a released task is neither completed nor overdue");
    }
    if finished != s.completed + s.stale_completions {
        bail!("a completion report was lost");
    }
    if !kernel.elevated_units().is_empty() {
        bail!("a unit is still elevated with an empty active registry");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(?args, "load-sim starting");

    match run(args).await {
        Ok(()) => info!("all invariants held"),
        Err(e) => {
            error!("load-sim failed: {:#}", e);
            process::exit(1);
        }
    }
}
