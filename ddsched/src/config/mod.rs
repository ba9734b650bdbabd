//! System configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! engine:
//!   request_capacity: 100
//!   snapshot_capacity: 16
//!   sweep_interval_ms: 10
//!   history_limit: 64
//! mailbox:
//!   release_wait_ms: 5
//!   complete_backoff_ms: 1
//!   complete_backoff_max_ms: 50
//! monitor:
//!   period_ms: 490
//! execution:
//!   slice_ms: 1
//! tasks:
//!   - id: 1
//!     kind: periodic
//!     period_ms: 500
//!     relative_deadline_ms: 500
//!     execution_ms: 95
//!   - id: 4
//!     kind: aperiodic
//!     relative_deadline_ms: 900
//!     execution_ms: 150
//! ```
//!
//! Every section is optional.  A missing or empty `tasks` list falls back to
//! [`SystemConfig::default_task_set`].

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::EngineLimits;
use crate::mailbox::DeliveryPolicy;
use crate::task::{SchedRef, TaskId, TaskKind, Tick};

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    engine: EngineConfig,
    mailbox: MailboxConfig,
    monitor: MonitorConfig,
    execution: ExecutionConfig,
    tasks: Vec<TaskEntry>,
}

/// Per-task fields as they appear in the YAML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskEntry {
    id: u32,
    #[serde(default)]
    kind: TaskKind,
    period_ms: Option<u64>,
    /// Defaults to the period for periodic tasks.
    relative_deadline_ms: Option<u64>,
    execution_ms: u64,
    /// Execution unit; defaults to the task id.
    unit: Option<u32>,
}

// ── Public sections ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub request_capacity: usize,
    pub snapshot_capacity: usize,
    pub sweep_interval_ms: u64,
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_capacity: 100,
            snapshot_capacity: 16,
            sweep_interval_ms: 10,
            history_limit: 64,
        }
    }
}

impl EngineConfig {
    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            history_limit: self.history_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailboxConfig {
    pub release_wait_ms: u64,
    pub complete_backoff_ms: u64,
    pub complete_backoff_max_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            release_wait_ms: 5,
            complete_backoff_ms: 1,
            complete_backoff_max_ms: 50,
        }
    }
}

impl MailboxConfig {
    pub fn delivery(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            release_wait: Duration::from_millis(self.release_wait_ms),
            complete_backoff: Duration::from_millis(self.complete_backoff_ms),
            complete_backoff_max: Duration::from_millis(self.complete_backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub period_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { period_ms: 490 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Granularity of payload progress.
    pub slice_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { slice_ms: 1 }
    }
}

// ── TaskClass ─────────────────────────────────────────────────────────────────

/// One configured task class: a generator plus its execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskClass {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub unit: SchedRef,
    /// Release period; `None` for aperiodic classes.
    pub period_ms: Option<u64>,
    pub relative_deadline_ms: Tick,
    pub execution_ms: Tick,
}

impl TaskClass {
    pub fn periodic(id: u32, period_ms: u64, execution_ms: Tick) -> Self {
        Self {
            task_id: TaskId(id),
            kind: TaskKind::Periodic,
            unit: SchedRef(id),
            period_ms: Some(period_ms),
            relative_deadline_ms: period_ms,
            execution_ms,
        }
    }

    pub fn aperiodic(id: u32, relative_deadline_ms: Tick, execution_ms: Tick) -> Self {
        Self {
            task_id: TaskId(id),
            kind: TaskKind::Aperiodic,
            unit: SchedRef(id),
            period_ms: None,
            relative_deadline_ms,
            execution_ms,
        }
    }

    fn from_entry(entry: TaskEntry) -> Result<Self> {
        let id = entry.id;
        let period_ms = match entry.kind {
            TaskKind::Periodic => match entry.period_ms {
                Some(p) if p > 0 => Some(p),
                _ => bail!("periodic task {id} needs a non-zero period_ms"),
            },
            TaskKind::Aperiodic => {
                if entry.period_ms.is_some() {
                    warn!(task_id = id, "period_ms ignored for aperiodic task");
                }
                None
            }
        };
        let relative_deadline_ms = match entry.relative_deadline_ms.or(period_ms) {
            Some(d) if d > 0 => d,
            _ => bail!("task {id} needs a non-zero relative_deadline_ms"),
        };
        if entry.execution_ms == 0 {
            bail!("task {id} needs a non-zero execution_ms");
        }

        Ok(Self {
            task_id: TaskId(id),
            kind: entry.kind,
            unit: SchedRef(entry.unit.unwrap_or(id)),
            period_ms,
            relative_deadline_ms,
            execution_ms: entry.execution_ms,
        })
    }
}

// ── SystemConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub engine: EngineConfig,
    pub mailbox: MailboxConfig,
    pub monitor: MonitorConfig,
    pub execution: ExecutionConfig,
    pub tasks: Vec<TaskClass>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            mailbox: MailboxConfig::default(),
            monitor: MonitorConfig::default(),
            execution: ExecutionConfig::default(),
            tasks: Self::default_task_set(),
        }
    }
}

impl SystemConfig {
    /// Three periodic classes and one button-style aperiodic class.
    ///
    /// Periods 500/500/750 ms give a 1500 ms hyperperiod.
    pub fn default_task_set() -> Vec<TaskClass> {
        vec![
            TaskClass::periodic(1, 500, 95),
            TaskClass::periodic(2, 500, 150),
            TaskClass::periodic(3, 750, 250),
            TaskClass::aperiodic(4, 900, 150),
        ]
    }

    /// Parses `path` and validates the result.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or validation fails.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading system configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parses a YAML document and validates the result.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content).context("Failed to parse YAML")?;

        let mut tasks = Vec::with_capacity(file.tasks.len());
        for entry in file.tasks {
            tasks.push(TaskClass::from_entry(entry)?);
        }

        if tasks.is_empty() {
            warn!("No tasks found in configuration, using default task set");
            tasks = Self::default_task_set();
        }

        let config = Self {
            engine: file.engine,
            mailbox: file.mailbox,
            monitor: file.monitor,
            execution: file.execution,
            tasks,
        };
        config.validate()?;

        for t in &config.tasks {
            debug!(
                "  Task: {} | {:?} | unit: {} | period: {:?}ms | deadline: {}ms | exec: {}ms",
                t.task_id, t.kind, t.unit, t.period_ms, t.relative_deadline_ms, t.execution_ms,
            );
        }
        info!(
            "Successfully loaded {} task class(es)",
            config.tasks.len()
        );

        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.engine.request_capacity == 0 || self.engine.snapshot_capacity == 0 {
            bail!("engine mailbox capacities must be non-zero");
        }
        if self.engine.sweep_interval_ms == 0 {
            bail!("engine.sweep_interval_ms must be non-zero");
        }
        if self.mailbox.complete_backoff_ms == 0 {
            bail!("mailbox.complete_backoff_ms must be non-zero");
        }
        if self.mailbox.complete_backoff_max_ms < self.mailbox.complete_backoff_ms {
            bail!("mailbox.complete_backoff_max_ms must be >= complete_backoff_ms");
        }
        if self.monitor.period_ms == 0 || self.execution.slice_ms == 0 {
            bail!("monitor.period_ms and execution.slice_ms must be non-zero");
        }

        let mut ids = HashSet::new();
        let mut units = HashSet::new();
        for t in &self.tasks {
            if !ids.insert(t.task_id) {
                bail!("duplicate task id {}", t.task_id.0);
            }
            if !units.insert(t.unit) {
                bail!("execution unit {} is shared by more than one task", t.unit.0);
            }
        }
        Ok(())
    }

    /// Periodic classes only.
    pub fn periodic(&self) -> impl Iterator<Item = &TaskClass> {
        self.tasks.iter().filter(|t| t.kind == TaskKind::Periodic)
    }

    /// Aperiodic classes only.
    pub fn aperiodic(&self) -> impl Iterator<Item = &TaskClass> {
        self.tasks.iter().filter(|t| t.kind == TaskKind::Aperiodic)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
