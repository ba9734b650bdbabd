/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the scheduling engine.
//!
//! Two error enums model the two failure layers:
//!
//! * [`InvariantViolation`] — which registry invariant was breached and where
//!   (low-level, carries exact ids and positions).
//! * [`SchedulerError`] — outcome of processing one request in
//!   [`Engine::process()`](super::Engine::process).
//!
//! | Variant | Fatal | Engine reaction |
//! |---|---|---|
//! | `StaleCompletion` | no | logged + counted, request dropped |
//! | `DuplicateRelease` | no | second release rejected + counted |
//! | `UnitInUse` | no | release rejected + counted |
//! | `Kernel` | yes | engine loop stops |
//! | `RegistryCorruption` | yes | engine loop stops |

use thiserror::Error;

use crate::kernel::KernelError;
use crate::task::{SchedRef, TaskId, Tick};

// ── Invariant violations ──────────────────────────────────────────────────────

/// A breach of one of the registry invariants.
///
/// Any of these means the engine's own logic is defective, so it is carried
/// inside [`SchedulerError::RegistryCorruption`] and halts the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Active registry is not non-decreasing in deadline at `position`.
    #[error("active registry out of deadline order at position {position} ({before} > {after})")]
    ActiveUnsorted {
        position: usize,
        before: Tick,
        after: Tick,
    },

    /// The same task id is active twice.
    #[error("task {task_id} appears more than once in the active registry")]
    DuplicateActive { task_id: TaskId },

    /// One released instance is held by more than one registry.
    #[error("instance #{release_seq} of task {task_id} is held by more than one registry")]
    SharedInstance { task_id: TaskId, release_seq: u64 },

    /// A registry holds a descriptor that was never released.
    #[error("task {task_id} is registered but has no release stamp")]
    Unreleased { task_id: TaskId },

    /// Two active descriptors govern the same execution unit.
    #[error("execution unit {sched_ref} is owned by more than one active task")]
    SharedUnit { sched_ref: SchedRef },

    /// `completion_time` / `overdue_time` do not match the holding registry.
    #[error("task {task_id} in the {registry} registry has inconsistent event stamps")]
    StampMismatch {
        task_id: TaskId,
        registry: &'static str,
    },

    /// The elevated unit is not the Active head's.
    #[error("elevated unit is {actual:?} but active head owns {expected:?}")]
    ElevationMismatch {
        expected: Option<SchedRef>,
        actual: Option<SchedRef>,
    },
}

// ── Top-level engine errors ───────────────────────────────────────────────────

/// Error returned by [`Engine::process()`](super::Engine::process).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `Complete` for a task that is not Active (already completed, already
    /// overdue, or never released).
    #[error("stale completion for task {task_id} — not in the active registry")]
    StaleCompletion { task_id: TaskId },

    /// `Release` for a task id that is already Active.  The in-flight task is
    /// left untouched.
    #[error("duplicate release for task {task_id} — already active")]
    DuplicateRelease { task_id: TaskId },

    /// `Release` naming an execution unit that an Active task already owns.
    #[error("task {task_id} cannot be released: {sched_ref} is owned by active task {owner}")]
    UnitInUse {
        task_id: TaskId,
        sched_ref: SchedRef,
        owner: TaskId,
    },

    /// A kernel scheduling primitive failed.
    #[error("kernel primitive failed: {0}")]
    Kernel(#[from] KernelError),

    /// An invariant check failed after a transition.
    #[error("registry corruption: {0}")]
    RegistryCorruption(#[from] InvariantViolation),
}

impl SchedulerError {
    /// Fatal errors stop the engine loop; the others are recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Kernel(_) | SchedulerError::RegistryCorruption(_)
        )
    }
}
