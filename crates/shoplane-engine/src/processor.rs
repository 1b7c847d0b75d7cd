//! Scheduled-Run Processor — drains due runs through the state machine.
//!
//! Each run is processed independently: one run's failure (or a store
//! hiccup while recording it) never aborts the batch. The claim step is an
//! atomic conditional update, so overlapping ticks racing on the same run
//! resolve to exactly one winner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use shoplane_core::error::Result;
use shoplane_core::traits::AutomationStore;
use shoplane_core::types::AutomationRun;

use crate::dispatch::{ActionContext, ActionDispatcher};

/// Outcome counters for one batch of scheduled runs.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RunBatchStats {
    /// Runs that reached a terminal state this tick (completed, failed, or
    /// cancelled). Runs lost to another tick's claim are not counted.
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

enum RunOutcome {
    Cancelled,
    /// Another tick claimed the run first.
    Skipped,
    Succeeded,
    Failed(String),
}

pub struct RunProcessor {
    store: Arc<dyn AutomationStore>,
    dispatcher: Arc<ActionDispatcher>,
}

impl RunProcessor {
    pub fn new(store: Arc<dyn AutomationStore>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Process up to `limit` due runs. Only the initial due-run query can
    /// fail this call; everything past it is per-unit and recorded in
    /// `errors` instead.
    pub async fn process_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        errors: &mut Vec<String>,
    ) -> Result<RunBatchStats> {
        let due = self.store.due_runs(now, limit)?;
        let mut stats = RunBatchStats::default();

        for run in due {
            match self.process_one(&run, now).await {
                Ok(RunOutcome::Cancelled) => stats.processed += 1,
                Ok(RunOutcome::Skipped) => {}
                Ok(RunOutcome::Succeeded) => {
                    stats.processed += 1;
                    stats.succeeded += 1;
                }
                Ok(RunOutcome::Failed(msg)) => {
                    stats.processed += 1;
                    stats.failed += 1;
                    errors.push(format!("run {}: {msg}", run.id));
                }
                // store failure mid-unit: isolate and keep draining
                Err(e) => errors.push(format!("run {}: {e}", run.id)),
            }
        }

        Ok(stats)
    }

    async fn process_one(&self, run: &AutomationRun, now: DateTime<Utc>) -> Result<RunOutcome> {
        let Some(record) = self.store.automation(&run.automation_id)? else {
            tracing::info!("Run {} cancelled: automation {} gone", run.id, run.automation_id);
            self.store.cancel_run(&run.id, now)?;
            return Ok(RunOutcome::Cancelled);
        };

        if !record.is_active {
            tracing::info!("Run {} cancelled: automation {} inactive", run.id, record.id);
            self.store.cancel_run(&run.id, now)?;
            return Ok(RunOutcome::Cancelled);
        }

        if !self.store.claim_run(&run.id, now)? {
            tracing::debug!("Run {} already claimed by an overlapping tick", run.id);
            return Ok(RunOutcome::Skipped);
        }

        // Decode failures (unknown action type, malformed config) are
        // per-unit failures recorded on the run, not batch aborts.
        let automation = match record.decode() {
            Ok(a) => a,
            Err(e) => {
                let msg = e.to_string();
                self.store.fail_run(&run.id, &msg, Utc::now())?;
                self.store.record_run_outcome(&record.id, false, Utc::now())?;
                return Ok(RunOutcome::Failed(msg));
            }
        };

        let ctx = ActionContext {
            automation: &automation,
            trigger_data: &run.trigger_data,
            store_id: &run.store_id,
            resource_id: run.resource_id.as_deref(),
            resource_type: run.resource_type.as_deref(),
        };

        match self.dispatcher.execute(&ctx).await {
            Ok(result) => {
                self.store.complete_run(&run.id, &result, Utc::now())?;
                self.store
                    .record_run_outcome(&automation.id, true, Utc::now())?;
                Ok(RunOutcome::Succeeded)
            }
            Err(e) => {
                let msg = e.to_string();
                tracing::warn!("⚠️ Run {} failed: {msg}", run.id);
                self.store.fail_run(&run.id, &msg, Utc::now())?;
                self.store
                    .record_run_outcome(&automation.id, false, Utc::now())?;
                Ok(RunOutcome::Failed(msg))
            }
        }
    }
}
