//! Per-step and per-chain migration summaries.

use std::time::Duration;

use notestore_core::Fingerprint;
use serde::Serialize;
use tracing::{error, info};

use crate::mapping::{MappingPlan, PlanKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
}

/// One executed step. Not persisted; logged and returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRun {
    pub source_version: u32,
    pub destination_version: u32,
    pub source_fingerprint: Fingerprint,
    pub destination_fingerprint: Fingerprint,
    pub plan: PlanKind,
    pub records_read: usize,
    pub records_written: usize,
    pub elapsed_ms: u64,
    pub outcome: RunOutcome,
}

impl MigrationRun {
    pub(crate) fn new(plan: &MappingPlan, elapsed: Duration, outcome: RunOutcome) -> Self {
        Self {
            source_version: plan.source.version(),
            destination_version: plan.destination.version(),
            source_fingerprint: plan.source.fingerprint().clone(),
            destination_fingerprint: plan.destination.fingerprint().clone(),
            plan: plan.kind,
            records_read: 0,
            records_written: 0,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            outcome,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Emit the run as a structured event.
    pub(crate) fn log(&self) {
        match &self.outcome {
            RunOutcome::Succeeded => info!(
                from = self.source_version,
                to = self.destination_version,
                plan = %self.plan,
                records_read = self.records_read,
                records_written = self.records_written,
                elapsed_ms = self.elapsed_ms,
                "migration step completed"
            ),
            RunOutcome::Failed(reason) => error!(
                from = self.source_version,
                to = self.destination_version,
                plan = %self.plan,
                elapsed_ms = self.elapsed_ms,
                error = %reason,
                "migration step failed; store left at its prior version"
            ),
        }
    }
}

/// Result of driving a store to the latest version.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Version the store was recorded at, `None` for a fresh or unrecognized store.
    pub start: Option<u32>,
    pub end: u32,
    pub runs: Vec<MigrationRun>,
}

impl MigrationReport {
    /// True when no step had to run.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.runs.is_empty()
    }
}
