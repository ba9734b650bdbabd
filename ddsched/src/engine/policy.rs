/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Priority-assignment policy: the EDF-emulation mechanism.
//!
//! This is the only place in the crate that calls
//! [`Kernel::set_priority`].  The engine tells the policy which unit owns the
//! Active head after every transition; the policy demotes the previous holder
//! and elevates the new one, so at most one unit is ever elevated.

use std::sync::Arc;

use tracing::debug;

use crate::kernel::{Kernel, KernelError, PriorityLevel};
use crate::task::SchedRef;

pub struct PriorityPolicy {
    kernel: Arc<dyn Kernel>,
    elevated: Option<SchedRef>,
}

impl PriorityPolicy {
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        Self {
            kernel,
            elevated: None,
        }
    }

    /// Unit currently holding elevated priority.
    pub fn elevated(&self) -> Option<SchedRef> {
        self.elevated
    }

    /// Make `head` the only elevated unit.
    ///
    /// No kernel call is made when the holder does not change.  Returns
    /// `true` when a swap happened.
    pub fn reconcile(&mut self, head: Option<SchedRef>) -> Result<bool, KernelError> {
        if self.elevated == head {
            return Ok(false);
        }
        if let Some(prev) = self.elevated {
            self.demote(prev)?;
        }
        if let Some(next) = head {
            self.elevate(next)?;
        }
        Ok(true)
    }

    fn elevate(&mut self, unit: SchedRef) -> Result<(), KernelError> {
        self.kernel.set_priority(unit, PriorityLevel::Elevated)?;
        self.elevated = Some(unit);
        debug!(unit = %unit, "elevated");
        Ok(())
    }

    fn demote(&mut self, unit: SchedRef) -> Result<(), KernelError> {
        self.kernel.set_priority(unit, PriorityLevel::Baseline)?;
        self.elevated = None;
        debug!(unit = %unit, "demoted to baseline");
        Ok(())
    }
}
