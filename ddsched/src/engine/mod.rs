//! Deadline-driven scheduling engine.
//!
//! [`Engine`] is a single-threaded actor.  It owns the Active, Completed and
//! Overdue [`Registry`]s and is the only component that changes kernel
//! priorities.  Requests arrive on the inbound mailbox and are processed one
//! at a time, to completion, so no request ever observes a registry
//! mid-transition and the registries need no locks.
//!
//! # Transitions
//!
//! | Request | Effect |
//! |---|---|
//! | `Release(d)` | stamp release, insert into Active by deadline, re-elevate head, resume unit |
//! | `Complete(id)` | stamp completion, move Active → Completed, re-elevate head |
//! | `Query(which)` | publish a [`Snapshot`] to the monitor feed (lossy) |
//! | `SweepOverdue(now)` | move expired heads Active → Overdue, park their units, re-elevate head |
//!
//! Every transition ends with [`PriorityPolicy::reconcile`] and a full
//! invariant [`audit`](registry::audit).  A failed audit is fatal.
//!
//! # Example
//! ```rust,ignore
//! let (handle, inbox, feed) = mailboxes(100, 16, DeliveryPolicy::default());
//! let engine = Engine::new(kernel, clock, feed, EngineLimits::default());
//! let report = engine.run(inbox, shutdown_rx).await?;
//! ```

pub mod error;
pub mod policy;
pub mod registry;

pub use error::{InvariantViolation, SchedulerError};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::kernel::Kernel;
use crate::mailbox::{Inbox, SnapshotFeed};
use crate::task::{RegistryKind, SchedRef, Snapshot, TaskDescriptor, TaskId, Tick};

use policy::PriorityPolicy;
use registry::{audit, Registry};

// ── Requests ──────────────────────────────────────────────────────────────────

/// A message on the engine's inbound mailbox.
#[derive(Debug, Clone)]
pub enum Request {
    /// Sent by a generator.
    Release(TaskDescriptor),
    /// Sent by an execution unit when its payload has finished.
    Complete(TaskId),
    /// Sent by the monitor.
    Query(RegistryKind),
    /// Internal periodic trigger raised by [`Engine::run`]'s sweep interval.
    SweepOverdue(Tick),
}

// ── Limits / counters ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineLimits {
    /// Cadence of the internal overdue sweep in [`Engine::run`].
    pub sweep_interval: Duration,
    /// Maximum descriptors kept in each terminal registry; older ones are
    /// reclaimed first.
    pub history_limit: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(10),
            history_limit: 64,
        }
    }
}

/// Monotonic counters kept by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub released: u64,
    pub completed: u64,
    pub overdue: u64,
    pub stale_completions: u64,
    pub duplicate_releases: u64,
    pub units_in_use: u64,
    pub snapshots_published: u64,
    /// Terminal descriptors dropped by the history limit.
    pub reclaimed: u64,
}

/// Final state reported when the engine loop exits.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub stats: EngineStats,
    pub active: usize,
    pub completed: usize,
    pub overdue: usize,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    active: Registry,
    completed: Registry,
    overdue: Registry,

    policy: PriorityPolicy,
    kernel: Arc<dyn Kernel>,
    clock: Arc<dyn Clock>,
    feed: SnapshotFeed,

    limits: EngineLimits,
    next_seq: u64,
    stats: EngineStats,
}

impl Engine {
    pub fn new(
        kernel: Arc<dyn Kernel>,
        clock: Arc<dyn Clock>,
        feed: SnapshotFeed,
        limits: EngineLimits,
    ) -> Self {
        Self {
            active: Registry::new(RegistryKind::Active),
            completed: Registry::new(RegistryKind::Completed),
            overdue: Registry::new(RegistryKind::Overdue),
            policy: PriorityPolicy::new(kernel.clone()),
            kernel,
            clock,
            feed,
            limits,
            next_seq: 0,
            stats: EngineStats::default(),
        }
    }

    // ── Actor loop ────────────────────────────────────────────────────────────

    /// Drain `inbox` until it closes or `shutdown` fires.
    ///
    /// The overdue sweep runs on its own interval between requests.  Recoverable
    /// errors are logged and counted inside [`process`](Self::process); a fatal
    /// one stops the loop and is returned.
    pub async fn run(
        mut self,
        mut inbox: Inbox,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<EngineReport, SchedulerError> {
        let mut sweep = tokio::time::interval(self.limits.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sweep_interval_ms = self.limits.sweep_interval.as_millis() as u64,
            history_limit = self.limits.history_limit,
            "scheduling engine started"
        );

        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                msg = inbox.recv() => match msg {
                    Some(request) => request,
                    None => break,
                },
                _ = sweep.tick() => Request::SweepOverdue(self.clock.now()),
            };

            if let Err(e) = self.process(request) {
                if e.is_fatal() {
                    error!(error = %e, "scheduling engine halted");
                    return Err(e);
                }
            }
        }

        let report = self.report();
        info!(
            active = report.active,
            completed = report.completed,
            overdue = report.overdue,
            "scheduling engine stopped"
        );
        Ok(report)
    }

    // ── Request processing ────────────────────────────────────────────────────

    /// Apply one request to completion.
    ///
    /// Release and Complete first sweep at the current time, so a task whose
    /// deadline already passed is Overdue before either is applied.
    pub fn process(&mut self, request: Request) -> Result<(), SchedulerError> {
        let outcome = match request {
            Request::Release(task) => {
                let now = self.clock.now();
                self.sweep_overdue(now)?;
                self.release(task, now)
            }
            Request::Complete(task_id) => {
                let now = self.clock.now();
                self.sweep_overdue(now)?;
                self.complete(task_id, now)
            }
            Request::Query(which) => {
                self.query(which);
                Ok(())
            }
            Request::SweepOverdue(now) => self.sweep_overdue(now).map(|_| ()),
        };

        if matches!(&outcome, Err(e) if e.is_fatal()) {
            return outcome;
        }
        self.settle()?;
        outcome
    }

    fn release(&mut self, mut task: TaskDescriptor, now: Tick) -> Result<(), SchedulerError> {
        let task_id = task.task_id;

        if self.active.contains(task_id) {
            self.stats.duplicate_releases += 1;
            warn!(task_id = %task_id, "duplicate release rejected — task already active");
            return Err(SchedulerError::DuplicateRelease { task_id });
        }
        if let Some(owner) = self.active.owner_of(task.sched_ref) {
            self.stats.units_in_use += 1;
            warn!(
                task_id = %task_id,
                unit = %task.sched_ref,
                owner = %owner,
                "release rejected — execution unit owned by another active task"
            );
            return Err(SchedulerError::UnitInUse {
                task_id,
                sched_ref: task.sched_ref,
                owner,
            });
        }

        self.next_seq += 1;
        task.release_time = Some(now);
        task.release_seq = Some(self.next_seq);
        task.completion_time = None;
        task.overdue_time = None;

        let unit = task.sched_ref;
        let deadline = task.absolute_deadline;
        let position = self.active.insert_by_deadline(task);
        self.stats.released += 1;

        info!(
            task_id = %task_id,
            unit = %unit,
            release = now,
            deadline,
            position,
            active = self.active.len(),
            "task released"
        );

        self.reconcile()?;
        self.kernel.resume(unit)?;
        Ok(())
    }

    fn complete(&mut self, task_id: TaskId, now: Tick) -> Result<(), SchedulerError> {
        let Some((position, mut task)) = self.active.remove(task_id) else {
            self.stats.stale_completions += 1;
            warn!(task_id = %task_id, now, "stale completion dropped — task not active");
            return Err(SchedulerError::StaleCompletion { task_id });
        };

        task.completion_time = Some(now);
        info!(
            task_id = %task_id,
            completion = now,
            deadline = task.absolute_deadline,
            slack = task.slack(now),
            was_head = position == 0,
            "task completed"
        );
        self.completed.push_back(task);
        self.stats.completed += 1;

        self.reconcile()?;
        Ok(())
    }

    /// Move every Active task whose deadline is strictly before `now` to
    /// Overdue.  Returns how many moved.
    fn sweep_overdue(&mut self, now: Tick) -> Result<usize, SchedulerError> {
        let late = self.active.take_expired(now);
        if late.is_empty() {
            return Ok(0);
        }

        let count = late.len();
        for mut task in late {
            task.overdue_time = Some(now);
            warn!(
                task_id = %task.task_id,
                deadline = task.absolute_deadline,
                now,
                "deadline missed — task moved to overdue"
            );
            // The late payload is abandoned; a new release resumes the unit.
            self.kernel.park(task.sched_ref)?;
            self.overdue.push_back(task);
            self.stats.overdue += 1;
        }

        self.reconcile()?;
        Ok(count)
    }

    fn query(&mut self, which: RegistryKind) {
        let registry = match which {
            RegistryKind::Active => &self.active,
            RegistryKind::Completed => &self.completed,
            RegistryKind::Overdue => &self.overdue,
        };
        let snapshot = Snapshot {
            registry: registry.kind(),
            taken_at: self.clock.now(),
            tasks: registry.as_slice().to_vec(),
        };
        let len = snapshot.tasks.len();

        if self.feed.publish(snapshot) {
            self.stats.snapshots_published += 1;
            debug!(registry = %which, len, "snapshot published");
        } else {
            debug!(registry = %which, "snapshot dropped — no monitor subscribed");
        }
    }

    // ── Post-transition helpers ───────────────────────────────────────────────

    fn reconcile(&mut self) -> Result<(), SchedulerError> {
        let head = self.head_unit();
        if self.policy.reconcile(head)? {
            debug!(head = ?self.active.head().map(|t| t.task_id), "active head changed");
        }
        Ok(())
    }

    /// Reclaim old terminal entries, then audit all invariants.
    fn settle(&mut self) -> Result<(), SchedulerError> {
        let limit = self.limits.history_limit;
        let reclaimed = self.completed.trim_to(limit) + self.overdue.trim_to(limit);
        self.stats.reclaimed += reclaimed as u64;

        audit(
            self.active.as_slice(),
            self.completed.as_slice(),
            self.overdue.as_slice(),
        )?;

        let expected = self.head_unit();
        let actual = self.policy.elevated();
        if expected != actual {
            return Err(InvariantViolation::ElevationMismatch { expected, actual }.into());
        }
        Ok(())
    }

    fn head_unit(&self) -> Option<SchedRef> {
        self.active.head().map(|t| t.sched_ref)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn active(&self) -> &Registry {
        &self.active
    }

    pub fn completed(&self) -> &Registry {
        &self.completed
    }

    pub fn overdue(&self) -> &Registry {
        &self.overdue
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Unit the engine believes holds elevated priority.
    pub fn elevated(&self) -> Option<SchedRef> {
        self.policy.elevated()
    }

    pub fn report(&self) -> EngineReport {
        EngineReport {
            stats: self.stats.clone(),
            active: self.active.len(),
            completed: self.completed.len(),
            overdue: self.overdue.len(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kernel::{PriorityLevel, SimKernel};
    use crate::mailbox::{mailboxes, DeliveryPolicy};
    use crate::task::TaskKind;
    use proptest::prelude::*;
    use tokio::sync::broadcast;

    // ── Test helpers ──────────────────────────────────────────────────────────

    struct Rig {
        engine: Engine,
        kernel: Arc<SimKernel>,
        clock: Arc<ManualClock>,
        snapshots: broadcast::Receiver<Snapshot>,
    }

    fn rig_with_limit(units: u32, history_limit: usize) -> Rig {
        let kernel = Arc::new(SimKernel::new());
        for i in 1..=units {
            kernel.register(SchedRef(i));
        }
        let clock = Arc::new(ManualClock::new(0));
        let (_handle, _inbox, feed) = mailboxes(8, 8, DeliveryPolicy::default());
        let snapshots = feed.subscribe();
        let limits = EngineLimits {
            history_limit,
            ..Default::default()
        };
        let engine = Engine::new(kernel.clone(), clock.clone(), feed, limits);
        Rig {
            engine,
            kernel,
            clock,
            snapshots,
        }
    }

    fn rig(units: u32) -> Rig {
        rig_with_limit(units, 64)
    }

    fn task(id: u32, deadline: Tick) -> TaskDescriptor {
        TaskDescriptor::new(TaskId(id), TaskKind::Periodic, SchedRef(id), deadline)
    }

    fn active_ids(e: &Engine) -> Vec<u32> {
        e.active().iter().map(|t| t.task_id.0).collect()
    }

    // ── Reference scenario ────────────────────────────────────────────────────

    #[test]
    fn earlier_deadline_preempts_then_completes_then_overdue() {
        let mut r = rig(2);

        r.engine.process(Request::Release(task(1, 100))).unwrap();
        assert_eq!(r.kernel.elevated_units(), vec![SchedRef(1)]);

        r.engine.process(Request::Release(task(2, 50))).unwrap();
        assert_eq!(active_ids(&r.engine), vec![2, 1]);
        assert_eq!(r.kernel.elevated_units(), vec![SchedRef(2)]);
        assert_eq!(r.kernel.level(SchedRef(1)), Some(PriorityLevel::Baseline));

        r.clock.set(10);
        r.engine.process(Request::Complete(TaskId(2))).unwrap();
        let done = r.engine.completed().head().unwrap();
        assert_eq!(done.task_id, TaskId(2));
        assert_eq!(done.completion_time, Some(10));
        assert_eq!(active_ids(&r.engine), vec![1]);
        assert_eq!(r.kernel.elevated_units(), vec![SchedRef(1)]);

        r.engine.process(Request::SweepOverdue(101)).unwrap();
        let late = r.engine.overdue().head().unwrap();
        assert_eq!(late.task_id, TaskId(1));
        assert_eq!(late.overdue_time, Some(101));
        assert_eq!(late.completion_time, None);
        assert!(r.engine.active().is_empty());
        assert!(r.kernel.elevated_units().is_empty());
    }

    // ── Release ───────────────────────────────────────────────────────────────

    #[test]
    fn release_stamps_time_and_resumes_unit() {
        let mut r = rig(1);
        r.clock.set(7);
        r.engine.process(Request::Release(task(1, 100))).unwrap();

        let t = r.engine.active().head().unwrap();
        assert_eq!(t.release_time, Some(7));
        assert_eq!(t.release_seq, Some(1));
        assert_eq!(r.kernel.is_parked(SchedRef(1)), Some(false));
    }

    #[test]
    fn later_deadline_release_does_not_steal_elevation() {
        let mut r = rig(2);
        r.engine.process(Request::Release(task(1, 50))).unwrap();
        r.engine.process(Request::Release(task(2, 80))).unwrap();
        assert_eq!(r.kernel.elevated_units(), vec![SchedRef(1)]);
        // Resumed, but stays at baseline until it reaches the head.
        assert_eq!(r.kernel.is_parked(SchedRef(2)), Some(false));
        assert_eq!(r.kernel.level(SchedRef(2)), Some(PriorityLevel::Baseline));
    }

    #[test]
    fn equal_deadline_keeps_earlier_release_at_head() {
        let mut r = rig(2);
        r.engine.process(Request::Release(task(1, 50))).unwrap();
        r.engine.process(Request::Release(task(2, 50))).unwrap();
        assert_eq!(active_ids(&r.engine), vec![1, 2]);
        assert_eq!(r.engine.elevated(), Some(SchedRef(1)));
    }

    #[test]
    fn duplicate_release_is_rejected_and_counted() {
        let mut r = rig(1);
        r.engine.process(Request::Release(task(1, 100))).unwrap();
        let err = r.engine.process(Request::Release(task(1, 20))).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateRelease { task_id: TaskId(1) }));
        assert!(!err.is_fatal());

        // In-flight task untouched.
        assert_eq!(r.engine.active().head().unwrap().absolute_deadline, 100);
        assert_eq!(r.engine.stats().duplicate_releases, 1);
    }

    #[test]
    fn release_on_owned_unit_is_rejected() {
        let mut r = rig(1);
        r.engine.process(Request::Release(task(1, 100))).unwrap();
        let other = TaskDescriptor::new(TaskId(9), TaskKind::Aperiodic, SchedRef(1), 40);
        let err = r.engine.process(Request::Release(other)).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::UnitInUse {
                owner: TaskId(1),
                ..
            }
        ));
        assert_eq!(active_ids(&r.engine), vec![1]);
        assert_eq!(r.engine.stats().units_in_use, 1);
    }

    #[test]
    fn unknown_unit_is_fatal() {
        let mut r = rig(0);
        let err = r.engine.process(Request::Release(task(3, 100))).unwrap_err();
        assert!(matches!(err, SchedulerError::Kernel(_)));
        assert!(err.is_fatal());
    }

    // ── Complete ──────────────────────────────────────────────────────────────

    #[test]
    fn completion_of_unknown_task_is_stale() {
        let mut r = rig(1);
        let err = r.engine.process(Request::Complete(TaskId(1))).unwrap_err();
        assert!(matches!(err, SchedulerError::StaleCompletion { .. }));
        assert_eq!(r.engine.stats().stale_completions, 1);
    }

    #[test]
    fn second_completion_is_stale() {
        let mut r = rig(1);
        r.engine.process(Request::Release(task(1, 100))).unwrap();
        r.engine.process(Request::Complete(TaskId(1))).unwrap();
        assert!(r.engine.process(Request::Complete(TaskId(1))).is_err());
        assert_eq!(r.engine.completed().len(), 1);
        assert_eq!(r.engine.stats().completed, 1);
    }

    #[test]
    fn completing_non_head_keeps_head_elevated() {
        let mut r = rig(2);
        r.engine.process(Request::Release(task(1, 50))).unwrap();
        r.engine.process(Request::Release(task(2, 80))).unwrap();
        r.engine.process(Request::Complete(TaskId(2))).unwrap();
        assert_eq!(r.kernel.elevated_units(), vec![SchedRef(1)]);
    }

    #[test]
    fn completion_after_deadline_is_stale_and_task_is_overdue() {
        let mut r = rig(1);
        r.engine.process(Request::Release(task(1, 30))).unwrap();
        r.clock.set(31);
        let err = r.engine.process(Request::Complete(TaskId(1))).unwrap_err();
        assert!(matches!(err, SchedulerError::StaleCompletion { .. }));
        assert!(r.engine.completed().is_empty());
        assert_eq!(r.engine.overdue().head().unwrap().overdue_time, Some(31));
    }

    #[test]
    fn completion_exactly_on_deadline_is_on_time() {
        let mut r = rig(1);
        r.engine.process(Request::Release(task(1, 30))).unwrap();
        r.clock.set(30);
        r.engine.process(Request::Complete(TaskId(1))).unwrap();
        assert_eq!(r.engine.completed().len(), 1);
        assert!(r.engine.overdue().is_empty());
    }

    // ── Sweep ─────────────────────────────────────────────────────────────────

    #[test]
    fn sweep_parks_overdue_units_and_elevates_next() {
        let mut r = rig(3);
        r.engine.process(Request::Release(task(1, 10))).unwrap();
        r.engine.process(Request::Release(task(2, 20))).unwrap();
        r.engine.process(Request::Release(task(3, 90))).unwrap();

        r.engine.process(Request::SweepOverdue(25)).unwrap();
        let late: Vec<u32> = r.engine.overdue().iter().map(|t| t.task_id.0).collect();
        assert_eq!(late, vec![1, 2]);
        assert_eq!(r.kernel.is_parked(SchedRef(1)), Some(true));
        assert_eq!(r.kernel.is_parked(SchedRef(2)), Some(true));
        assert_eq!(r.kernel.elevated_units(), vec![SchedRef(3)]);
    }

    #[test]
    fn release_triggers_implicit_sweep() {
        let mut r = rig(2);
        r.engine.process(Request::Release(task(1, 10))).unwrap();
        r.clock.set(15);
        r.engine.process(Request::Release(task(2, 40))).unwrap();
        assert_eq!(active_ids(&r.engine), vec![2]);
        assert_eq!(r.engine.overdue().len(), 1);
    }

    #[test]
    fn release_after_overdue_resumes_unit_into_new_generation() {
        let mut r = rig(1);
        r.engine.process(Request::Release(task(1, 5))).unwrap();
        let first = r.kernel.state(SchedRef(1)).unwrap().generation;

        r.clock.set(12);
        r.engine.process(Request::Release(task(1, 112))).unwrap();
        assert_eq!(r.engine.stats().overdue, 1);
        assert_eq!(r.engine.overdue().head().unwrap().absolute_deadline, 5);
        assert_eq!(active_ids(&r.engine), vec![1]);

        let state = r.kernel.state(SchedRef(1)).unwrap();
        assert!(!state.parked);
        assert_eq!(state.level, PriorityLevel::Elevated);
        assert_eq!(state.generation, first + 1);
    }

    #[test]
    fn periodic_id_can_be_released_again_after_completion() {
        let mut r = rig(1);
        r.engine.process(Request::Release(task(1, 50))).unwrap();
        r.engine.process(Request::Complete(TaskId(1))).unwrap();
        r.clock.set(60);
        r.engine.process(Request::Release(task(1, 110))).unwrap();
        assert_eq!(r.engine.active().head().unwrap().release_seq, Some(2));
        assert_eq!(r.engine.completed().head().unwrap().release_seq, Some(1));
    }

    // ── Query / history ───────────────────────────────────────────────────────

    #[test]
    fn query_publishes_copy_of_registry() {
        let mut r = rig(2);
        r.engine.process(Request::Release(task(1, 100))).unwrap();
        r.engine.process(Request::Release(task(2, 50))).unwrap();
        r.engine.process(Request::Query(RegistryKind::Active)).unwrap();

        let snap = r.snapshots.try_recv().unwrap();
        assert_eq!(snap.registry, RegistryKind::Active);
        assert_eq!(snap.ids(), vec![TaskId(2), TaskId(1)]);
        assert_eq!(r.engine.stats().snapshots_published, 1);
        // Registry itself unchanged.
        assert_eq!(r.engine.active().len(), 2);
    }

    #[test]
    fn query_without_monitor_is_not_an_error() {
        let mut r = rig(0);
        drop(r.snapshots);
        r.engine.process(Request::Query(RegistryKind::Overdue)).unwrap();
        assert_eq!(r.engine.stats().snapshots_published, 0);
    }

    #[test]
    fn history_limit_reclaims_oldest_terminal_entries() {
        let mut r = rig_with_limit(1, 2);
        for round in 0..4u64 {
            r.clock.set(round * 10);
            r.engine
                .process(Request::Release(task(1, round * 10 + 5)))
                .unwrap();
            r.engine.process(Request::Complete(TaskId(1))).unwrap();
        }
        let seqs: Vec<u64> = r
            .engine
            .completed()
            .iter()
            .filter_map(|t| t.release_seq)
            .collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(r.engine.stats().reclaimed, 2);
    }

    // ── Async loop ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn run_processes_requests_until_shutdown() {
        let kernel = Arc::new(SimKernel::new());
        kernel.register(SchedRef(1));
        let clock = Arc::new(ManualClock::new(0));
        let (handle, inbox, feed) = mailboxes(8, 8, DeliveryPolicy::default());
        let (stop_tx, stop_rx) = watch::channel(false);

        let engine = Engine::new(kernel.clone(), clock, feed, EngineLimits::default());
        let join = tokio::spawn(engine.run(inbox, stop_rx));

        handle.release(task(1, 1_000)).await.unwrap();
        handle.complete(TaskId(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        stop_tx.send(true).unwrap();
        let report = join.await.unwrap().unwrap();
        assert_eq!(report.stats.released, 1);
        assert_eq!(report.stats.completed, 1);
        assert_eq!(report.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_on_interval_without_requests() {
        let kernel = Arc::new(SimKernel::new());
        kernel.register(SchedRef(1));
        let clock = Arc::new(ManualClock::new(0));
        let (handle, inbox, feed) = mailboxes(8, 8, DeliveryPolicy::default());
        let (stop_tx, stop_rx) = watch::channel(false);

        let engine = Engine::new(kernel, clock.clone(), feed, EngineLimits::default());
        let join = tokio::spawn(engine.run(inbox, stop_rx));

        handle.release(task(1, 20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        clock.set(50);
        tokio::time::sleep(Duration::from_millis(30)).await;

        stop_tx.send(true).unwrap();
        let report = join.await.unwrap().unwrap();
        assert_eq!(report.stats.overdue, 1);
        assert_eq!(report.overdue, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_fatal_error() {
        let kernel = Arc::new(SimKernel::new());
        let clock = Arc::new(ManualClock::new(0));
        let (handle, inbox, feed) = mailboxes(8, 8, DeliveryPolicy::default());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let engine = Engine::new(kernel, clock, feed, EngineLimits::default());
        let join = tokio::spawn(engine.run(inbox, stop_rx));

        // Unit 5 was never registered with the kernel.
        handle.release(task(5, 100)).await.unwrap();
        let result = join.await.unwrap();
        assert!(matches!(result, Err(SchedulerError::Kernel(_))));
    }

    // ── Properties ────────────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Op {
        Release { id: u32, deadline: Tick },
        Complete { id: u32 },
        Advance { ticks: Tick },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..=6, 0u64..400).prop_map(|(id, deadline)| Op::Release { id, deadline }),
            (1u32..=6).prop_map(|id| Op::Complete { id }),
            (0u64..40).prop_map(|ticks| Op::Advance { ticks }),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_after_every_request(ops in proptest::collection::vec(op(), 1..80)) {
            let mut r = rig(6);
            let mut accepted_completions = Vec::new();

            for op in ops {
                let now = r.clock.now();
                let result = match op {
                    Op::Release { id, deadline } => {
                        r.engine.process(Request::Release(task(id, now + deadline)))
                    }
                    Op::Complete { id } => {
                        let seq = r
                            .engine
                            .active()
                            .iter()
                            .find(|t| t.task_id.0 == id)
                            .and_then(|t| t.release_seq);
                        let res = r.engine.process(Request::Complete(TaskId(id)));
                        if let (Ok(()), Some(seq)) = (&res, seq) {
                            accepted_completions.push(seq);
                        }
                        res
                    }
                    Op::Advance { ticks } => {
                        r.clock.advance(ticks);
                        r.engine.process(Request::SweepOverdue(r.clock.now()))
                    }
                };
                if let Err(e) = &result {
                    prop_assert!(!e.is_fatal(), "fatal: {e}");
                }

                // Deadline order, disjointness, stamps.
                prop_assert!(audit(
                    r.engine.active().as_slice(),
                    r.engine.completed().as_slice(),
                    r.engine.overdue().as_slice(),
                ).is_ok());

                // Single elevation: exactly the head's unit, or nobody.
                let head = r.engine.active().head().map(|t| t.sched_ref);
                prop_assert_eq!(r.kernel.elevated_units(), head.into_iter().collect::<Vec<_>>());

                // No task completed on time ever lands in Overdue.
                for t in r.engine.overdue().iter() {
                    prop_assert!(t.overdue_time.unwrap() > t.absolute_deadline);
                }
                for t in r.engine.completed().iter() {
                    prop_assert!(t.completion_time.unwrap() <= t.absolute_deadline);
                }
            }

            // Accepted completions never revert to Active.
            for seq in accepted_completions {
                prop_assert!(r.engine.active().iter().all(|t| t.release_seq != Some(seq)));
            }
        }
    }
}
