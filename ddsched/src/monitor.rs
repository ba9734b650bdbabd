/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Read-only observer of the three registries.
//!
//! The monitor never touches engine state.  Each period it renders whatever
//! snapshots arrived since the last one, then asks for fresh copies of all
//! three registries.  Query delivery is best-effort in both directions: a
//! full inbox drops the query, a full feed evicts the oldest snapshot, and
//! neither is an error.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::registry::audit;
use crate::engine::InvariantViolation;
use crate::mailbox::EngineHandle;
use crate::task::{RegistryKind, Snapshot};

// ── MonitorView ───────────────────────────────────────────────────────────────

/// Latest snapshot seen for each registry.
#[derive(Debug, Clone, Default)]
pub struct MonitorView {
    pub active: Option<Snapshot>,
    pub completed: Option<Snapshot>,
    pub overdue: Option<Snapshot>,
    /// Snapshots received.
    pub received: u64,
    /// Snapshots evicted from the feed before this monitor read them.
    pub missed: u64,
}

impl MonitorView {
    pub fn latest(&self, which: RegistryKind) -> Option<&Snapshot> {
        match which {
            RegistryKind::Active => self.active.as_ref(),
            RegistryKind::Completed => self.completed.as_ref(),
            RegistryKind::Overdue => self.overdue.as_ref(),
        }
    }

    /// Keep `snapshot` unless an equally fresh or newer one is already held.
    pub fn record(&mut self, snapshot: Snapshot) {
        self.received += 1;
        let slot = match snapshot.registry {
            RegistryKind::Active => &mut self.active,
            RegistryKind::Completed => &mut self.completed,
            RegistryKind::Overdue => &mut self.overdue,
        };
        if slot.as_ref().map_or(true, |s| s.taken_at <= snapshot.taken_at) {
            *slot = Some(snapshot);
        }
    }

    /// Run the registry audit over the latest snapshots.
    ///
    /// The three snapshots are taken at different moments, so this is only
    /// meaningful once the system is quiescent.  A missing snapshot counts
    /// as an empty registry.
    pub fn audit(&self) -> Result<(), InvariantViolation> {
        let tasks = |which| self.latest(which).map_or(&[][..], |s| s.tasks.as_slice());
        audit(
            tasks(RegistryKind::Active),
            tasks(RegistryKind::Completed),
            tasks(RegistryKind::Overdue),
        )
    }

    fn render(&self) {
        for which in RegistryKind::ALL {
            match self.latest(which) {
                Some(s) => info!(
                    registry = %which,
                    taken_at = s.taken_at,
                    len = s.tasks.len(),
                    ids = ?s.ids(),
                    "registry"
                ),
                None => debug!(registry = %which, "no snapshot yet"),
            }
        }
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

pub struct Monitor {
    handle: EngineHandle,
    feed: broadcast::Receiver<Snapshot>,
    period: Duration,
    view: MonitorView,
}

impl Monitor {
    /// `feed` should be subscribed before the engine starts publishing.
    pub fn new(handle: EngineHandle, feed: broadcast::Receiver<Snapshot>, period: Duration) -> Self {
        Self {
            handle,
            feed,
            period,
            view: MonitorView::default(),
        }
    }

    pub fn view(&self) -> &MonitorView {
        &self.view
    }

    /// Take every snapshot already waiting on the feed.  Returns how many
    /// were received.
    pub fn drain(&mut self) -> usize {
        let mut received = 0;
        loop {
            match self.feed.try_recv() {
                Ok(snapshot) => {
                    self.view.record(snapshot);
                    received += 1;
                }
                Err(TryRecvError::Lagged(n)) => {
                    self.view.missed += n;
                    debug!(missed = n, "monitor lagged — oldest snapshots evicted");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        received
    }

    /// Ask for all three registries.  Returns how many queries were queued.
    pub fn request_all(&self) -> usize {
        RegistryKind::ALL
            .into_iter()
            .filter(|&which| match self.handle.query(which) {
                Ok(()) => true,
                Err(e) => {
                    debug!(registry = %which, error = %e, "query dropped");
                    false
                }
            })
            .count()
    }

    /// Poll every `period` until `shutdown` fires or the engine goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MonitorView {
        let mut ticker = tokio::time::interval(self.period);
        info!(period_ms = self.period.as_millis() as u64, "monitor started");

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.drain();
                    self.view.render();
                    if self.handle.is_closed() {
                        break;
                    }
                    self.request_all();
                }
            }
        }

        self.drain();
        info!(
            received = self.view.received,
            missed = self.view.missed,
            "monitor stopped"
        );
        self.view
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
