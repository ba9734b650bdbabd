/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Execution units: the schedulable contexts that run task payloads.
//!
//! A unit starts parked at baseline priority.  It makes progress only while
//! the kernel reports it resumed *and* elevated, i.e. while its task is the
//! Active head.  A demoted unit stalls mid-payload (preemption); a parked one
//! abandons the instance (the engine parks units whose task went overdue),
//! and so does one that was parked and resumed since the payload began.
//!
//! On finishing, the unit parks itself *before* reporting `Complete`, so a
//! resume for the next instance can never be overwritten by a late park.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TaskClass;
use crate::kernel::{Kernel, UnitState};
use crate::mailbox::{EngineHandle, MailboxError};
use crate::task::{SchedRef, TaskId, Tick};

/// Counters returned when a unit stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub task_id: TaskId,
    pub unit: SchedRef,
    /// Payloads run to the end and reported.
    pub finished: u64,
    /// Payloads cut short because the unit was parked.
    pub abandoned: u64,
}

enum Payload {
    Finished,
    Abandoned,
    Shutdown,
}

pub struct ExecutionUnit {
    task_id: TaskId,
    unit: SchedRef,
    execution: Tick,
    slice: Duration,
    one_shot: bool,

    state: watch::Receiver<UnitState>,
    kernel: Arc<dyn Kernel>,
    handle: EngineHandle,
    clock: Arc<dyn Clock>,
}

impl ExecutionUnit {
    /// `state` must be the kernel's state channel for `class.unit`.
    pub fn new(
        class: &TaskClass,
        state: watch::Receiver<UnitState>,
        kernel: Arc<dyn Kernel>,
        handle: EngineHandle,
        clock: Arc<dyn Clock>,
        slice: Duration,
    ) -> Self {
        Self {
            task_id: class.task_id,
            unit: class.unit,
            execution: class.execution_ms,
            slice: slice.max(Duration::from_millis(1)),
            one_shot: false,
            state,
            kernel,
            handle,
            clock,
        }
    }

    /// Exit after the first reported completion.
    pub fn one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = one_shot;
        self
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> UnitReport {
        let mut report = UnitReport {
            task_id: self.task_id,
            unit: self.unit,
            finished: 0,
            abandoned: 0,
        };

        debug!(
            task_id = %self.task_id,
            unit = %self.unit,
            execution_ms = self.execution,
            one_shot = self.one_shot,
            "execution unit started"
        );

        while !*shutdown.borrow() {
            let scheduled = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                r = wait_until(&mut self.state, UnitState::is_runnable) => r,
            };
            let Some(scheduled) = scheduled else {
                break;
            };

            match self.execute(scheduled.generation, &mut shutdown).await {
                Payload::Shutdown => break,
                Payload::Abandoned => {
                    report.abandoned += 1;
                    warn!(task_id = %self.task_id, unit = %self.unit, "payload abandoned — unit parked");
                }
                Payload::Finished => {
                    if let Err(e) = self.kernel.park(self.unit) {
                        warn!(unit = %self.unit, error = %e, "unit could not park itself");
                    }
                    match self.handle.complete(self.task_id).await {
                        Ok(()) => {
                            report.finished += 1;
                            debug!(task_id = %self.task_id, now = self.clock.now(), "completion reported");
                        }
                        Err(MailboxError::Full) | Err(MailboxError::Closed) => break,
                    }
                    if self.one_shot {
                        break;
                    }
                }
            }
        }

        info!(
            task_id = %self.task_id,
            unit = %self.unit,
            finished = report.finished,
            abandoned = report.abandoned,
            "execution unit stopped"
        );
        report
    }

    /// Run one payload of `execution` ticks, counting only time spent
    /// runnable.  The payload belongs to resume `generation`; a park, or a
    /// resume into a later generation, abandons it.
    async fn execute(
        &mut self,
        generation: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Payload {
        let mut done: Tick = 0;
        let mut last = self.clock.now();

        while done < self.execution {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return Payload::Shutdown,
                _ = tokio::time::sleep(self.slice) => {}
            }

            let now = self.clock.now();
            let state = *self.state.borrow();
            if state.parked || state.generation != generation {
                return Payload::Abandoned;
            }
            if state.is_runnable() {
                done += now.saturating_sub(last);
                last = now;
                continue;
            }

            // Demoted: another task holds the head.  Stall until elevated
            // again or parked.
            let woke = tokio::select! {
                biased;
                _ = shutdown.changed() => return Payload::Shutdown,
                r = wait_until(&mut self.state, |s| {
                    s.is_runnable() || s.parked || s.generation != generation
                }) => r,
            };
            match woke {
                Some(s) if s.parked || s.generation != generation => return Payload::Abandoned,
                Some(_) => last = self.clock.now(),
                None => return Payload::Shutdown,
            }
        }
        Payload::Finished
    }
}

/// Wait until the unit state satisfies `ready` and return a copy of it.
///
/// `None` once the kernel drops the unit.
async fn wait_until(
    state: &mut watch::Receiver<UnitState>,
    ready: impl FnMut(&UnitState) -> bool,
) -> Option<UnitState> {
    state.wait_for(ready).await.ok().map(|s| *s)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
