/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! ddsched – user-level earliest-deadline-first scheduling on top of a
//! fixed-priority preemptive kernel.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── task          – TaskDescriptor, ids, registry selector, Snapshot
//! ├── clock         – shared monotonic tick source
//! ├── kernel        – set_priority / park / resume, SimKernel substrate
//! ├── engine/       – the single-owner scheduling actor
//! │   ├── registry  – deadline-ordered Active list, terminal lists, audit
//! │   ├── policy    – elevated / baseline priority assignment
//! │   └── error     – StaleCompletion, DuplicateRelease, RegistryCorruption …
//! ├── mailbox       – bounded request inbox, lossy snapshot feed
//! ├── generator     – periodic and aperiodic release producers
//! ├── unit          – execution units running task payloads
//! ├── monitor       – best-effort registry observer
//! ├── config/       – YAML system configuration
//! ├── hyperperiod   – LCM of the periodic task set
//! └── system        – wires everything together
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod generator;
pub mod hyperperiod;
pub mod kernel;
pub mod mailbox;
pub mod monitor;
pub mod system;
pub mod task;
pub mod unit;
