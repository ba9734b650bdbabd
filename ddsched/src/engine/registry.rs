/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deadline-ordered task registries.
//!
//! A [`Registry`] is an owned, contiguous sequence of descriptors.  The engine
//! is its only owner, so there is no shared ownership and no locking.
//!
//! The Active registry is kept sorted by inserting at the right place rather
//! than re-sorting: a linear scan from the head finds the first strictly later
//! deadline.  Registries are small, and a scan has predictable cost.

use std::collections::HashSet;

use crate::task::{RegistryKind, SchedRef, TaskDescriptor, TaskId, Tick};

use super::error::InvariantViolation;

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Registry {
    kind: RegistryKind,
    tasks: Vec<TaskDescriptor>,
}

impl Registry {
    pub fn new(kind: RegistryKind) -> Self {
        Self {
            kind,
            tasks: Vec::new(),
        }
    }

    pub fn kind(&self) -> RegistryKind {
        self.kind
    }

    /// Insert keeping ascending deadline order and return the position.
    ///
    /// The new descriptor goes before the first entry with a strictly later
    /// deadline, so equal deadlines stay in release order.
    pub fn insert_by_deadline(&mut self, task: TaskDescriptor) -> usize {
        let pos = self
            .tasks
            .iter()
            .position(|t| t.absolute_deadline > task.absolute_deadline)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(pos, task);
        pos
    }

    /// Append in arrival order (terminal registries).
    pub fn push_back(&mut self, task: TaskDescriptor) {
        self.tasks.push(task);
    }

    /// Remove the descriptor for `task_id`, returning its former position.
    /// The relative order of the remaining entries is preserved.
    pub fn remove(&mut self, task_id: TaskId) -> Option<(usize, TaskDescriptor)> {
        let pos = self.tasks.iter().position(|t| t.task_id == task_id)?;
        Some((pos, self.tasks.remove(pos)))
    }

    /// Pop every leading descriptor whose deadline is strictly before `now`.
    ///
    /// Only valid on a deadline-sorted registry: the scan stops at the first
    /// deadline that is still in the future.
    pub fn take_expired(&mut self, now: Tick) -> Vec<TaskDescriptor> {
        let split = self
            .tasks
            .iter()
            .position(|t| !t.is_expired(now))
            .unwrap_or(self.tasks.len());
        self.tasks.drain(..split).collect()
    }

    /// Drop the oldest entries so at most `limit` remain; returns how many
    /// were reclaimed.
    pub fn trim_to(&mut self, limit: usize) -> usize {
        let excess = self.tasks.len().saturating_sub(limit);
        self.tasks.drain(..excess);
        excess
    }

    pub fn head(&self) -> Option<&TaskDescriptor> {
        self.tasks.first()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.task_id == task_id)
    }

    /// Task currently governing `sched_ref`, if any.
    pub fn owner_of(&self, sched_ref: SchedRef) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|t| t.sched_ref == sched_ref)
            .map(|t| t.task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.iter()
    }

    pub fn as_slice(&self) -> &[TaskDescriptor] {
        &self.tasks
    }
}

// ── Invariant audit ───────────────────────────────────────────────────────────

/// Check invariants 1, 2 and 4 over the three registries.
///
/// Works on plain slices so the same audit runs inside the engine after every
/// transition and outside it on monitor snapshots.  Disjointness is checked
/// per released instance (`release_seq`), since task ids are reused.
pub fn audit(
    active: &[TaskDescriptor],
    completed: &[TaskDescriptor],
    overdue: &[TaskDescriptor],
) -> Result<(), InvariantViolation> {
    // Deadline order.
    for (i, pair) in active.windows(2).enumerate() {
        if pair[0].absolute_deadline > pair[1].absolute_deadline {
            return Err(InvariantViolation::ActiveUnsorted {
                position: i + 1,
                before: pair[0].absolute_deadline,
                after: pair[1].absolute_deadline,
            });
        }
    }

    // Unique ids and units among active tasks.
    let mut ids = HashSet::new();
    let mut units = HashSet::new();
    for t in active {
        if !ids.insert(t.task_id) {
            return Err(InvariantViolation::DuplicateActive { task_id: t.task_id });
        }
        if !units.insert(t.sched_ref) {
            return Err(InvariantViolation::SharedUnit {
                sched_ref: t.sched_ref,
            });
        }
    }

    // Event stamps match the holding registry.
    let stamps = [
        ("active", active, false, false),
        ("completed", completed, true, false),
        ("overdue", overdue, false, true),
    ];
    let mut instances = HashSet::new();
    for (registry, tasks, completion, late) in stamps {
        for t in tasks {
            if t.completion_time.is_some() != completion || t.overdue_time.is_some() != late {
                return Err(InvariantViolation::StampMismatch {
                    task_id: t.task_id,
                    registry,
                });
            }
            let seq = t
                .release_seq
                .ok_or(InvariantViolation::Unreleased { task_id: t.task_id })?;
            if !instances.insert(seq) {
                return Err(InvariantViolation::SharedInstance {
                    task_id: t.task_id,
                    release_seq: seq,
                });
            }
        }
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
