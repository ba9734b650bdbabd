/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Monotonic logical clocks.
//!
//! Every timestamp in the system (release, deadline, completion, overdue)
//! comes from one shared [`Clock`], so deadline comparisons never mix time
//! bases.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;

use crate::task::Tick;

/// Source of strictly non-decreasing logical ticks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Tick;
}

// ── MonotonicClock ────────────────────────────────────────────────────────────

/// Milliseconds elapsed since the clock was created.
///
/// Built on `tokio::time::Instant`, so a paused test runtime drives it
/// deterministically.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Tick {
        self.origin.elapsed().as_millis() as Tick
    }
}

// ── ManualClock ───────────────────────────────────────────────────────────────

/// Clock that only moves when told to.  Used to drive the engine through
/// exact tick sequences.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Tick) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock to `tick`.  Earlier values are ignored so the clock
    /// never runs backwards.
    pub fn set(&self, tick: Tick) {
        self.now.fetch_max(tick, Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: Tick) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.now.load(Ordering::SeqCst)
    }
}
