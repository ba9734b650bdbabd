/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The two mailboxes connecting the engine to the rest of the system.
//!
//! ```text
//! generators ─┐
//! units ──────┼──(mpsc, bounded, FIFO)──► Inbox ──► Engine ──► SnapshotFeed ──(broadcast, lossy)──► monitor
//! monitor ────┘
//! ```
//!
//! Delivery guarantees differ per request:
//!
//! | Request | Sender | When the inbox is full |
//! |---|---|---|
//! | `Release` | generator | wait up to `release_wait`, then [`MailboxError::Full`] (period skipped) |
//! | `Complete` | execution unit | retry with exponential backoff, never dropped |
//! | `Query` | monitor | [`MailboxError::Full`] immediately (best-effort) |
//!
//! Outbound snapshots never back-pressure the engine: when the feed is full
//! the oldest pending snapshot is evicted and a lagging monitor is told how
//! many it missed.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::engine::Request;
use crate::task::{RegistryKind, Snapshot, TaskDescriptor, TaskId};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// The inbox stayed full for the whole allowed wait.
    #[error("engine mailbox is full")]
    Full,

    /// The engine has stopped and dropped its inbox.
    #[error("engine mailbox is closed")]
    Closed,
}

// ── Delivery policy ───────────────────────────────────────────────────────────

/// Per-request behaviour of [`EngineHandle`] when the inbox is full.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Longest a generator waits before giving up on a release.
    pub release_wait: Duration,
    /// First retry delay for a completion report.
    pub complete_backoff: Duration,
    /// Upper bound for the doubled completion retry delay.
    pub complete_backoff_max: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            release_wait: Duration::from_millis(5),
            complete_backoff: Duration::from_millis(1),
            complete_backoff_max: Duration::from_millis(50),
        }
    }
}

/// Create the inbound request mailbox and the outbound snapshot feed.
///
/// Capacities below one are raised to one.
pub fn mailboxes(
    request_capacity: usize,
    snapshot_capacity: usize,
    delivery: DeliveryPolicy,
) -> (EngineHandle, Inbox, SnapshotFeed) {
    let (tx, rx) = mpsc::channel(request_capacity.max(1));
    let (snap_tx, _) = broadcast::channel(snapshot_capacity.max(1));
    (
        EngineHandle { tx, delivery },
        Inbox { rx },
        SnapshotFeed { tx: snap_tx },
    )
}

// ── EngineHandle ──────────────────────────────────────────────────────────────

/// Producer side of the inbound mailbox.  Cheap to clone; one per generator,
/// execution unit and monitor.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Request>,
    delivery: DeliveryPolicy,
}

impl EngineHandle {
    /// Hand a descriptor to the engine, waiting at most `release_wait` for
    /// room in the inbox.
    pub async fn release(&self, task: TaskDescriptor) -> Result<(), MailboxError> {
        self.tx
            .send_timeout(Request::Release(task), self.delivery.release_wait)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => MailboxError::Full,
                SendTimeoutError::Closed(_) => MailboxError::Closed,
            })
    }

    /// Report a finished payload.
    ///
    /// Retries with exponential backoff while the inbox is full; only a
    /// closed inbox makes it give up.
    pub async fn complete(&self, task_id: TaskId) -> Result<(), MailboxError> {
        let mut backoff = self.delivery.complete_backoff;
        let mut attempt: u32 = 0;

        loop {
            match self.tx.try_send(Request::Complete(task_id)) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(MailboxError::Closed),
                Err(TrySendError::Full(_)) => {
                    attempt += 1;
                    debug!(
                        task_id = %task_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "engine mailbox full — retrying completion"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.delivery.complete_backoff_max);
                }
            }
        }
    }

    /// Ask for a snapshot of `which`.  Never waits.
    pub fn query(&self, which: RegistryKind) -> Result<(), MailboxError> {
        self.tx.try_send(Request::Query(which)).map_err(|e| match e {
            TrySendError::Full(_) => MailboxError::Full,
            TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Returns `true` once the engine has dropped its inbox.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Inbox ─────────────────────────────────────────────────────────────────────

/// Consumer side of the inbound mailbox, owned by the engine.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Request>,
}

impl Inbox {
    /// Next request in FIFO order; `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<Request> {
        self.rx.recv().await
    }
}

// ── SnapshotFeed ──────────────────────────────────────────────────────────────

/// Outbound, bounded, lossy snapshot channel.
#[derive(Debug, Clone)]
pub struct SnapshotFeed {
    tx: broadcast::Sender<Snapshot>,
}

impl SnapshotFeed {
    /// Publish without blocking.  Returns `false` when nobody is subscribed.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        self.tx.send(snapshot).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}
