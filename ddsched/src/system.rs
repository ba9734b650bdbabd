/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Wiring of a complete scheduler instance.
//!
//! ```text
//!   PeriodicGenerator ×N ─┐                         ┌─► SimKernel (priorities, park/resume)
//!   AperiodicGenerator ×M ┼─► EngineHandle ─► Engine┤
//!   ExecutionUnit ×(N+M) ─┤                         └─► SnapshotFeed ─► Monitor
//!   Monitor (queries) ────┘
//! ```
//!
//! Every component runs as its own Tokio task and shares one
//! [`MonotonicClock`].  Units are registered with the kernel, parked, before
//! any generator starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::config::SystemConfig;
use crate::engine::{Engine, EngineReport, SchedulerError};
use crate::generator::{AperiodicGenerator, GeneratorReport, PeriodicGenerator, ReleaseSignal};
use crate::kernel::SimKernel;
use crate::mailbox::{mailboxes, EngineHandle};
use crate::monitor::{Monitor, MonitorView};
use crate::task::{TaskId, TaskKind};
use crate::unit::{ExecutionUnit, UnitReport};

/// Everything collected when a [`System`] shuts down.
#[derive(Debug)]
pub struct SystemReport {
    /// `Err` if the engine halted on a fatal error.
    pub engine: Result<EngineReport, SchedulerError>,
    pub generators: Vec<GeneratorReport>,
    pub units: Vec<UnitReport>,
    pub monitor: MonitorView,
}

impl SystemReport {
    pub fn is_healthy(&self) -> bool {
        self.engine.is_ok()
    }
}

pub struct System {
    handle: EngineHandle,
    signals: HashMap<TaskId, ReleaseSignal>,

    shutdown: watch::Sender<bool>,
    engine: JoinHandle<Result<EngineReport, SchedulerError>>,
    engine_exited: watch::Receiver<bool>,
    generators: Vec<JoinHandle<GeneratorReport>>,
    units: Vec<JoinHandle<UnitReport>>,
    monitor: JoinHandle<MonitorView>,
}

impl System {
    /// Validate `config` and spawn every component.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &SystemConfig) -> Result<Self> {
        config.validate().context("Invalid system configuration")?;

        let (handle, inbox, feed) = mailboxes(
            config.engine.request_capacity,
            config.engine.snapshot_capacity,
            config.mailbox.delivery(),
        );
        let kernel = Arc::new(SimKernel::new());
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        // Monitor subscribes before the engine can publish anything.
        let monitor = Monitor::new(
            handle.clone(),
            feed.subscribe(),
            Duration::from_millis(config.monitor.period_ms),
        );

        let engine = Engine::new(
            kernel.clone(),
            clock.clone(),
            feed.clone(),
            config.engine.limits(),
        );
        let (exited_tx, engine_exited) = watch::channel(false);
        let engine_rx = shutdown_rx.clone();
        let engine = tokio::spawn(async move {
            let result = engine.run(inbox, engine_rx).await;
            let _ = exited_tx.send(true);
            result
        });

        let slice = Duration::from_millis(config.execution.slice_ms);
        let mut units = Vec::with_capacity(config.tasks.len());
        for class in &config.tasks {
            let state = kernel.register(class.unit);
            let unit = ExecutionUnit::new(
                class,
                state,
                kernel.clone(),
                handle.clone(),
                clock.clone(),
                slice,
            );
            units.push(tokio::spawn(unit.run(shutdown_rx.clone())));
        }

        let monitor = tokio::spawn(monitor.run(shutdown_rx.clone()));

        let mut signals = HashMap::new();
        let mut generators = Vec::with_capacity(config.tasks.len());
        for class in &config.tasks {
            let task = match class.kind {
                TaskKind::Periodic => {
                    let gen = PeriodicGenerator::new(class.clone(), handle.clone(), clock.clone());
                    tokio::spawn(gen.run(shutdown_rx.clone()))
                }
                TaskKind::Aperiodic => {
                    let signal = ReleaseSignal::new();
                    signals.insert(class.task_id, signal.clone());
                    let gen = AperiodicGenerator::new(
                        class.clone(),
                        signal,
                        handle.clone(),
                        clock.clone(),
                    );
                    tokio::spawn(gen.run(shutdown_rx.clone()))
                }
            };
            generators.push(task);
        }

        info!(
            periodic = config.periodic().count(),
            aperiodic = signals.len(),
            "scheduler system started"
        );

        Ok(Self {
            handle,
            signals,
            shutdown,
            engine,
            engine_exited,
            generators,
            units,
            monitor,
        })
    }

    /// Fire the release signal of aperiodic task `task_id`.
    ///
    /// Returns `false` if no aperiodic class has that id.
    pub fn trigger(&self, task_id: TaskId) -> bool {
        match self.signals.get(&task_id) {
            Some(signal) => {
                signal.fire();
                true
            }
            None => {
                warn!(task_id = %task_id, "trigger ignored — no aperiodic task with this id");
                false
            }
        }
    }

    /// Fire every aperiodic release signal.
    pub fn trigger_all(&self) {
        for signal in self.signals.values() {
            signal.fire();
        }
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Resolves once the engine loop has exited.  Before [`System::shutdown`]
    /// that only happens on a fatal error.
    pub async fn engine_exited(&self) {
        let mut exited = self.engine_exited.clone();
        // A dropped sender means the engine task panicked.
        let _ = exited.wait_for(|done| *done).await;
    }

    /// Stop every component and collect their reports.
    ///
    /// # Errors
    /// Returns an error only if a component task panicked.
    pub async fn shutdown(self) -> Result<SystemReport> {
        info!("scheduler system shutting down");
        // Receivers may already be gone if everything stopped on its own.
        let _ = self.shutdown.send(true);

        let mut generators = Vec::with_capacity(self.generators.len());
        for task in self.generators {
            generators.push(task.await.context("generator task panicked")?);
        }

        let mut units = Vec::with_capacity(self.units.len());
        for task in self.units {
            units.push(task.await.context("execution unit task panicked")?);
        }

        let monitor = self.monitor.await.context("monitor task panicked")?;
        let engine = self.engine.await.context("engine task panicked")?;

        Ok(SystemReport {
            engine,
            generators,
            units,
            monitor,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
