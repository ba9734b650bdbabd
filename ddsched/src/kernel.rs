/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-priority preemptive substrate the EDF engine is layered on.
//!
//! The engine needs only three primitives from the underlying kernel:
//!
//! | Primitive | Used by | Purpose |
//! |---|---|---|
//! | `set_priority` | engine only | elevate the Active head, demote everyone else |
//! | `park` | engine, execution units | take a unit off the CPU until resumed |
//! | `resume` | engine | let a released unit run once it is scheduled |
//!
//! [`SimKernel`] is the in-process substrate used by the binaries and tests.
//! Each unit's state lives in a `tokio::sync::watch` channel so an execution
//! unit can `.await` until it is runnable.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::task::SchedRef;

// ── Priority levels ───────────────────────────────────────────────────────────

/// The two priority levels that force EDF order onto the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityLevel {
    /// Every unit that is not the Active head, including unreleased ones.
    #[default]
    Baseline,
    /// Reserved exclusively for the unit of the current Active head.
    Elevated,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// The handle does not refer to a unit known to the kernel.
    #[error("unknown execution unit {0}")]
    UnknownUnit(SchedRef),
}

// ── Kernel trait ──────────────────────────────────────────────────────────────

/// Scheduling primitives of the underlying kernel.
///
/// All three must be short and bounded; the tightness of the EDF guarantee
/// depends on it.
pub trait Kernel: Send + Sync {
    fn set_priority(&self, unit: SchedRef, level: PriorityLevel) -> Result<(), KernelError>;
    fn park(&self, unit: SchedRef) -> Result<(), KernelError>;
    fn resume(&self, unit: SchedRef) -> Result<(), KernelError>;
}

// ── SimKernel ─────────────────────────────────────────────────────────────────

/// Observable state of one simulated execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitState {
    pub level: PriorityLevel,
    pub parked: bool,
    /// Bumped every time the unit is un-parked.  A payload that sees it
    /// change was parked and resumed underneath it and is abandoned.
    pub generation: u64,
}

impl UnitState {
    /// A unit makes progress only while resumed and holding elevated priority.
    pub fn is_runnable(&self) -> bool {
        !self.parked && self.level == PriorityLevel::Elevated
    }
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            level: PriorityLevel::Baseline,
            parked: true,
            generation: 0,
        }
    }
}

/// In-process kernel substrate.
#[derive(Debug, Default)]
pub struct SimKernel {
    units: Mutex<HashMap<SchedRef, watch::Sender<UnitState>>>,
}

impl SimKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `unit` at baseline priority, parked, and return a receiver for
    /// its state.  Registering an existing unit just subscribes again.
    pub fn register(&self, unit: SchedRef) -> watch::Receiver<UnitState> {
        let mut units = self.lock();
        match units.get(&unit) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(UnitState::default());
                units.insert(unit, tx);
                debug!(unit = %unit, "execution unit registered");
                rx
            }
        }
    }

    pub fn state(&self, unit: SchedRef) -> Option<UnitState> {
        self.lock().get(&unit).map(|tx| *tx.borrow())
    }

    pub fn level(&self, unit: SchedRef) -> Option<PriorityLevel> {
        self.state(unit).map(|s| s.level)
    }

    pub fn is_parked(&self, unit: SchedRef) -> Option<bool> {
        self.state(unit).map(|s| s.parked)
    }

    /// Units currently holding elevated priority, sorted.
    pub fn elevated_units(&self) -> Vec<SchedRef> {
        let mut v: Vec<SchedRef> = self
            .lock()
            .iter()
            .filter(|(_, tx)| tx.borrow().level == PriorityLevel::Elevated)
            .map(|(unit, _)| *unit)
            .collect();
        v.sort_unstable();
        v
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SchedRef, watch::Sender<UnitState>>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the unit's state, waking waiters only on a real change.
    fn update(
        &self,
        unit: SchedRef,
        f: impl FnOnce(&mut UnitState) -> bool,
    ) -> Result<(), KernelError> {
        let units = self.lock();
        let tx = units.get(&unit).ok_or(KernelError::UnknownUnit(unit))?;
        tx.send_if_modified(f);
        Ok(())
    }
}

impl Kernel for SimKernel {
    fn set_priority(&self, unit: SchedRef, level: PriorityLevel) -> Result<(), KernelError> {
        self.update(unit, |s| {
            let changed = s.level != level;
            s.level = level;
            changed
        })
    }

    fn park(&self, unit: SchedRef) -> Result<(), KernelError> {
        self.update(unit, |s| !std::mem::replace(&mut s.parked, true))
    }

    fn resume(&self, unit: SchedRef) -> Result<(), KernelError> {
        self.update(unit, |s| {
            if !s.parked {
                return false;
            }
            s.parked = false;
            s.generation += 1;
            true
        })
    }
}
