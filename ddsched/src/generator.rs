/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deadline generators: the producers of `Release` requests.
//!
//! A [`PeriodicGenerator`] releases one instance per period on a timer.  An
//! [`AperiodicGenerator`] releases one instance each time its
//! [`ReleaseSignal`] fires.  Both stamp `absolute_deadline = now +
//! relative_deadline` from the shared clock and hand the descriptor to the
//! engine; the paired execution unit already exists, parked.
//!
//! A full engine mailbox costs the generator that one release (counted in
//! [`GeneratorReport::skipped`]); a closed mailbox stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TaskClass;
use crate::mailbox::{EngineHandle, MailboxError};
use crate::task::{TaskDescriptor, TaskId};

// ── ReleaseSignal ─────────────────────────────────────────────────────────────

/// External release trigger for an aperiodic class (button, interrupt, …).
///
/// A fire with no waiter is remembered, so a trigger that lands while the
/// generator is busy releasing is not lost.  Repeated fires collapse into one.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSignal {
    notify: Arc<Notify>,
}

impl ReleaseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Per-generator counters returned when the generator stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorReport {
    pub task_id: TaskId,
    pub released: u64,
    /// Releases given up because the engine mailbox stayed full.
    pub skipped: u64,
}

impl GeneratorReport {
    fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            released: 0,
            skipped: 0,
        }
    }
}

// ── Shared release step ───────────────────────────────────────────────────────

struct Releaser {
    class: TaskClass,
    handle: EngineHandle,
    clock: Arc<dyn Clock>,
}

impl Releaser {
    /// Build and send one instance.  Returns `false` once the engine is gone.
    async fn release_once(&self, report: &mut GeneratorReport) -> bool {
        let now = self.clock.now();
        let task = TaskDescriptor::new(
            self.class.task_id,
            self.class.kind,
            self.class.unit,
            now.saturating_add(self.class.relative_deadline_ms),
        );
        let deadline = task.absolute_deadline;

        match self.handle.release(task).await {
            Ok(()) => {
                report.released += 1;
                debug!(task_id = %self.class.task_id, now, deadline, "release sent");
                true
            }
            Err(MailboxError::Full) => {
                report.skipped += 1;
                warn!(
                    task_id = %self.class.task_id,
                    now,
                    skipped = report.skipped,
                    "engine mailbox full — release skipped"
                );
                true
            }
            Err(MailboxError::Closed) => {
                debug!(task_id = %self.class.task_id, "engine mailbox closed — generator stopping");
                false
            }
        }
    }
}

// ── PeriodicGenerator ─────────────────────────────────────────────────────────

pub struct PeriodicGenerator {
    releaser: Releaser,
    period: Duration,
}

impl PeriodicGenerator {
    /// A class without a period falls back to its relative deadline.
    pub fn new(class: TaskClass, handle: EngineHandle, clock: Arc<dyn Clock>) -> Self {
        let period_ms = class
            .period_ms
            .unwrap_or(class.relative_deadline_ms)
            .max(1);
        Self {
            releaser: Releaser {
                class,
                handle,
                clock,
            },
            period: Duration::from_millis(period_ms),
        }
    }

    /// Release immediately, then once per period until `shutdown` fires.
    ///
    /// Periods that elapse while the generator is blocked are skipped, never
    /// released in a burst.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> GeneratorReport {
        let task_id = self.releaser.class.task_id;
        let mut report = GeneratorReport::new(task_id);

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            task_id = %task_id,
            period_ms = self.period.as_millis() as u64,
            deadline_ms = self.releaser.class.relative_deadline_ms,
            "periodic generator started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if !self.releaser.release_once(&mut report).await {
                        break;
                    }
                }
            }
        }

        info!(
            task_id = %task_id,
            released = report.released,
            skipped = report.skipped,
            "periodic generator stopped"
        );
        report
    }
}

// ── AperiodicGenerator ────────────────────────────────────────────────────────

pub struct AperiodicGenerator {
    releaser: Releaser,
    signal: ReleaseSignal,
}

impl AperiodicGenerator {
    pub fn new(
        class: TaskClass,
        signal: ReleaseSignal,
        handle: EngineHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            releaser: Releaser {
                class,
                handle,
                clock,
            },
            signal,
        }
    }

    /// Release once per fired signal until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> GeneratorReport {
        let task_id = self.releaser.class.task_id;
        let mut report = GeneratorReport::new(task_id);

        info!(
            task_id = %task_id,
            deadline_ms = self.releaser.class.relative_deadline_ms,
            "aperiodic generator started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = self.signal.wait() => {
                    if !self.releaser.release_once(&mut report).await {
                        break;
                    }
                }
            }
        }

        info!(
            task_id = %task_id,
            released = report.released,
            skipped = report.skipped,
            "aperiodic generator stopped"
        );
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::engine::Request;
    use crate::mailbox::{mailboxes, DeliveryPolicy, Inbox};
    use crate::task::TaskKind;

    /// Releases already queued in `inbox`.
    async fn drain(inbox: &mut Inbox) -> Vec<TaskDescriptor> {
        let mut out = Vec::new();
        while let Ok(Some(req)) = tokio::time::timeout(Duration::ZERO, inbox.recv()).await {
            if let Request::Release(t) = req {
                out.push(t);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_releases_immediately_then_every_period() {
        let (handle, mut inbox, _feed) = mailboxes(16, 1, DeliveryPolicy::default());
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let gen = PeriodicGenerator::new(TaskClass::periodic(1, 100, 10), handle, clock);
        let task = tokio::spawn(gen.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(250)).await;
        stop_tx.send(true).unwrap();
        let report = task.await.unwrap();

        let released = drain(&mut inbox).await;
        assert_eq!(report.released, 3, "t = 0, 100, 200");
        assert_eq!(report.skipped, 0);
        let deadlines: Vec<_> = released.iter().map(|t| t.absolute_deadline).collect();
        assert_eq!(deadlines, vec![100, 200, 300]);
        assert!(released.iter().all(|t| t.release_time.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn full_mailbox_skips_release() {
        let (handle, _inbox, _feed) = mailboxes(1, 1, DeliveryPolicy::default());
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let gen = PeriodicGenerator::new(TaskClass::periodic(1, 100, 10), handle, clock);
        let task = tokio::spawn(gen.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(250)).await;
        stop_tx.send(true).unwrap();
        let report = task.await.unwrap();

        assert_eq!(report.released, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_mailbox_stops_generator() {
        let (handle, inbox, _feed) = mailboxes(4, 1, DeliveryPolicy::default());
        drop(inbox);
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = PeriodicGenerator::new(TaskClass::periodic(1, 100, 10), handle, clock)
            .run(stop_rx)
            .await;
        assert_eq!(report.released, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aperiodic_releases_once_per_signal() {
        let (handle, mut inbox, _feed) = mailboxes(16, 1, DeliveryPolicy::default());
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let signal = ReleaseSignal::new();

        let gen = AperiodicGenerator::new(
            TaskClass::aperiodic(4, 900, 150),
            signal.clone(),
            handle,
            clock,
        );
        let task = tokio::spawn(gen.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(drain(&mut inbox).await.is_empty(), "no release without a signal");

        signal.fire();
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.fire();
        tokio::time::sleep(Duration::from_millis(10)).await;

        stop_tx.send(true).unwrap();
        let report = task.await.unwrap();
        assert_eq!(report.released, 2);

        let released = drain(&mut inbox).await;
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|t| t.kind == TaskKind::Aperiodic));
        assert_eq!(released[0].absolute_deadline, 950);
        assert_eq!(released[1].absolute_deadline, 960);
    }

    #[tokio::test]
    async fn signal_fired_before_wait_is_remembered() {
        let signal = ReleaseSignal::new();
        signal.fire();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("stored permit should wake the waiter");
    }
}
