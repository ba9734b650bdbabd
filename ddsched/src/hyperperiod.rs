/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Hyperperiod of the configured periodic task set.
//!
//! The hyperperiod is the LCM of all periods: the smallest window after which
//! the periodic release pattern repeats.  The CLI uses it to pick a default
//! run length that covers whole release cycles.

use thiserror::Error;

use crate::config::SystemConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HyperperiodError {
    /// No periodic class with a non-zero period.
    #[error("no periodic task with a valid (non-zero) period")]
    NoValidPeriods,

    /// LCM calculation overflowed `u64`.
    #[error("LCM overflow computing lcm({a}, {b})")]
    Overflow { a: u64, b: u64 },
}

/// Iterative Euclidean GCD.  Returns the other input when one is `0`.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Checked LCM.  `Ok(0)` when either input is `0`.
pub fn lcm(a: u64, b: u64) -> Result<u64, HyperperiodError> {
    if a == 0 || b == 0 {
        return Ok(0);
    }
    // a / gcd is exact; divide first so only a genuinely huge result overflows.
    (a / gcd(a, b))
        .checked_mul(b)
        .ok_or(HyperperiodError::Overflow { a, b })
}

/// LCM of every element; `Ok(0)` for an empty slice.
pub fn lcm_of_slice(periods: &[u64]) -> Result<u64, HyperperiodError> {
    periods
        .iter()
        .try_fold(periods.first().copied().unwrap_or(0), |acc, &p| lcm(acc, p))
}

/// Hyperperiod, in milliseconds, of the periodic classes in `config`.
pub fn hyperperiod_ms(config: &SystemConfig) -> Result<u64, HyperperiodError> {
    let periods: Vec<u64> = config
        .periodic()
        .filter_map(|t| t.period_ms)
        .filter(|&p| p > 0)
        .collect();

    if periods.is_empty() {
        return Err(HyperperiodError::NoValidPeriods);
    }
    lcm_of_slice(&periods)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
