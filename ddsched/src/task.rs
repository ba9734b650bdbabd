/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core task data structures for the deadline-driven scheduler.
//!
//! ```text
//! Generator ──(TaskDescriptor)──► Engine ──► Active ──┬──► Completed
//!     ↑ created here               ↑ owned from here  └──► Overdue
//! ```
//!
//! # Ownership model
//! A [`TaskDescriptor`] is built by a generator and **moved** into the engine
//! inside a `Release` request.  From that point the engine owns it and it
//! lives in exactly one registry at a time.  The monitor only ever sees
//! clones carried by a [`Snapshot`].

use std::fmt;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Logical clock tick (milliseconds for the built-in clocks).
pub type Tick = u64;

/// Identifier of a deadline-driven task.
///
/// Unique among *currently active* tasks only: periodic task classes reuse
/// their id for every instance they release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Opaque handle to the kernel thread (execution unit) a descriptor governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedRef(pub u32);

impl fmt::Display for SchedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

// ── Task kind ─────────────────────────────────────────────────────────────────

/// How instances of a task are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Released by a timer every period.
    #[default]
    Periodic,
    /// Released by an external signal.
    Aperiodic,
}

// ── Registry selector ─────────────────────────────────────────────────────────

/// Which of the engine's three registries a query or snapshot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Active,
    Completed,
    Overdue,
}

impl RegistryKind {
    /// All registries in the order the monitor reports them.
    pub const ALL: [RegistryKind; 3] = [
        RegistryKind::Active,
        RegistryKind::Completed,
        RegistryKind::Overdue,
    ];
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistryKind::Active => "active",
            RegistryKind::Completed => "completed",
            RegistryKind::Overdue => "overdue",
        };
        f.write_str(name)
    }
}

// ── TaskDescriptor ────────────────────────────────────────────────────────────

/// The unit of scheduling.
///
/// Event timestamps are `Option<Tick>` instead of a zero sentinel: `None`
/// means "has not happened yet".  The engine stamps them; generators only
/// fill identity, kind, unit and deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    // ── Identity ──────────────────────────────────────────────────────────────
    pub task_id: TaskId,
    pub kind: TaskKind,

    /// Execution unit this descriptor governs.  At most one Active
    /// descriptor owns a given unit.
    pub sched_ref: SchedRef,

    // ── Timing ────────────────────────────────────────────────────────────────
    /// Tick by which the task must finish.
    pub absolute_deadline: Tick,

    /// Stamped by the engine on `Release`.
    pub release_time: Option<Tick>,

    /// Stamped by the engine on `Complete`.  Set iff in the Completed registry.
    pub completion_time: Option<Tick>,

    /// Stamped by the engine's overdue sweep.  Set iff in the Overdue registry.
    pub overdue_time: Option<Tick>,

    // ── Instance ──────────────────────────────────────────────────────────────
    /// Engine-assigned release sequence number.
    ///
    /// Because task ids are reused across periodic instances, this is what
    /// tells two instances of the same task apart in the terminal registries.
    pub release_seq: Option<u64>,
}

impl TaskDescriptor {
    /// Build an unreleased descriptor.
    pub fn new(
        task_id: TaskId,
        kind: TaskKind,
        sched_ref: SchedRef,
        absolute_deadline: Tick,
    ) -> Self {
        Self {
            task_id,
            kind,
            sched_ref,
            absolute_deadline,
            release_time: None,
            completion_time: None,
            overdue_time: None,
            release_seq: None,
        }
    }

    /// Returns `true` if the deadline has strictly passed at `now`.
    pub fn is_expired(&self, now: Tick) -> bool {
        self.absolute_deadline < now
    }

    /// Ticks left until the deadline (zero once it has passed).
    pub fn slack(&self, now: Tick) -> Tick {
        self.absolute_deadline.saturating_sub(now)
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Read-only copy of one registry, published by the engine for the monitor.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub registry: RegistryKind,
    /// Engine time at which the copy was taken.
    pub taken_at: Tick,
    /// Registry contents in registry order (deadline order for Active).
    pub tasks: Vec<TaskDescriptor>,
}

impl Snapshot {
    /// Task ids in registry order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.task_id).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_descriptor_has_no_event_stamps() {
        let d = TaskDescriptor::new(TaskId(1), TaskKind::Periodic, SchedRef(1), 500);
        assert_eq!(d.release_time, None);
        assert_eq!(d.completion_time, None);
        assert_eq!(d.overdue_time, None);
        assert_eq!(d.release_seq, None);
    }

    #[test]
    fn expired_only_strictly_after_deadline() {
        let d = TaskDescriptor::new(TaskId(1), TaskKind::Periodic, SchedRef(1), 100);
        assert!(!d.is_expired(99));
        assert!(!d.is_expired(100), "finishing exactly on the deadline is on time");
        assert!(d.is_expired(101));
    }

    #[test]
    fn slack_saturates_at_zero() {
        let d = TaskDescriptor::new(TaskId(1), TaskKind::Aperiodic, SchedRef(4), 100);
        assert_eq!(d.slack(40), 60);
        assert_eq!(d.slack(150), 0);
    }

    #[test]
    fn task_kind_deserialises_snake_case() {
        let k: TaskKind = serde_yaml::from_str("aperiodic").unwrap();
        assert_eq!(k, TaskKind::Aperiodic);
        let k: TaskKind = serde_yaml::from_str("periodic").unwrap();
        assert_eq!(k, TaskKind::Periodic);
    }

    #[test]
    fn display_forms_are_compact() {
        assert_eq!(TaskId(3).to_string(), "T3");
        assert_eq!(SchedRef(7).to_string(), "unit#7");
        assert_eq!(RegistryKind::Overdue.to_string(), "overdue");
    }
}
