//! Batch Driver — one cron tick end to end.
//!
//! A tick first reclaims runs a crashed worker left in `running`, then
//! drains due scheduled runs, then scans abandoned carts. The summary is
//! what the HTTP gateway returns to the scheduler.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;

use shoplane_core::config::CronConfig;
use shoplane_core::error::Result;
use shoplane_core::traits::{AutomationStore, Mailer};

use crate::dispatch::ActionDispatcher;
use crate::processor::{RunBatchStats, RunProcessor};
use crate::scanner::{CartScanStats, CartScanner};

/// What one tick accomplished. Serialized as the cron endpoint's response.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub stale_reclaimed: u64,
    #[serde(rename = "scheduledRuns")]
    pub runs: RunBatchStats,
    #[serde(rename = "abandonedCarts")]
    pub carts: CartScanStats,
    /// Per-unit failures. The tick itself still succeeded.
    pub errors: Vec<String>,
}

pub struct BatchDriver {
    store: Arc<dyn AutomationStore>,
    processor: RunProcessor,
    scanner: CartScanner,
    cron: CronConfig,
}

impl BatchDriver {
    pub fn new(store: Arc<dyn AutomationStore>, mailer: Arc<dyn Mailer>, cron: CronConfig) -> Self {
        let dispatcher = Arc::new(ActionDispatcher::new(store.clone(), mailer));
        Self {
            processor: RunProcessor::new(store.clone(), dispatcher.clone()),
            scanner: CartScanner::new(store.clone(), dispatcher),
            store,
            cron,
        }
    }

    /// Execute one tick. Errs only when the store is unreachable for the
    /// batch-level queries; everything per-unit is in `errors`.
    pub async fn run_tick(&self) -> Result<TickSummary> {
        let now = Utc::now();
        let mut summary = TickSummary::default();

        let cutoff = now - Duration::minutes(self.cron.stale_running_minutes);
        let reclaimed = self.store.reclaim_stale_runs(cutoff)?;
        if reclaimed > 0 {
            tracing::warn!("⚠️ Reclaimed {reclaimed} run(s) stuck in running");
        }
        summary.stale_reclaimed = reclaimed as u64;

        summary.runs = self
            .processor
            .process_due(now, self.cron.run_batch_size, &mut summary.errors)
            .await?;

        summary.carts = self
            .scanner
            .scan(now, self.cron.cart_batch_size, &mut summary.errors)
            .await?;

        tracing::info!(
            "⚡ Tick done: {} runs ({} ok, {} failed), {} recovery emails",
            summary.runs.processed,
            summary.runs.succeeded,
            summary.runs.failed,
            summary.carts.emails_sent,
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{cart_automation_record, email_automation_record, MockMailer};
    use serde_json::json;
    use shoplane_core::types::{AbandonedCart, AutomationRun, RunStatus, TriggerData};
    use shoplane_store::SqliteStore;

    fn driver(mailer: Arc<MockMailer>) -> (Arc<SqliteStore>, BatchDriver) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let driver = BatchDriver::new(store.clone(), mailer, CronConfig::default());
        (store, driver)
    }

    #[tokio::test]
    async fn test_tick_covers_runs_and_carts() {
        let mailer = Arc::new(MockMailer::default());
        let (store, driver) = driver(mailer.clone());

        store
            .insert_automation(&email_automation_record("a-run", "s1", true))
            .unwrap();
        let data: TriggerData =
            serde_json::from_value(json!({"customerEmail": "x@y.z"})).unwrap();
        store
            .insert_run(&AutomationRun::scheduled("a-run", "s1", data, Utc::now()))
            .unwrap();

        store
            .insert_automation(&cart_automation_record("a-cart", "s1", None, 60))
            .unwrap();
        store
            .insert_cart(&AbandonedCart {
                id: "c1".into(),
                store_id: "s1".into(),
                email: Some("shopper@x.y".into()),
                items: json!([]),
                subtotal: 10.0,
                recovery_token: "tok".into(),
                created_at: Utc::now() - Duration::hours(2),
                recovered_at: None,
                reminder_sent_at: None,
                reminder_count: 0,
            })
            .unwrap();

        let summary = driver.run_tick().await.unwrap();

        assert_eq!(summary.stale_reclaimed, 0);
        assert_eq!(summary.runs.succeeded, 1);
        assert_eq!(summary.carts.emails_sent, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_tick_reclaims_stale_runs_first() {
        let mailer = Arc::new(MockMailer::default());
        let (store, driver) = driver(mailer);

        store
            .insert_automation(&email_automation_record("a1", "s1", true))
            .unwrap();
        let data: TriggerData =
            serde_json::from_value(json!({"customerEmail": "x@y.z"})).unwrap();
        let run = AutomationRun::scheduled("a1", "s1", data, Utc::now() - Duration::hours(1));
        store.insert_run(&run).unwrap();
        // a crashed worker claimed it an hour ago and never finished
        assert!(store
            .claim_run(&run.id, Utc::now() - Duration::hours(1))
            .unwrap());

        let summary = driver.run_tick().await.unwrap();

        // reclaimed and immediately re-executed in the same tick
        assert_eq!(summary.stale_reclaimed, 1);
        assert_eq!(summary.runs.succeeded, 1);
        assert_eq!(
            store.run(&run.id).unwrap().unwrap().status,
            RunStatus::Completed
        );
    }

    // The serialized summary is what external schedulers parse; the field
    // names are a wire contract.
    #[test]
    fn test_summary_wire_field_names() {
        let v = serde_json::to_value(TickSummary::default()).unwrap();
        assert!(v.get("staleReclaimed").is_some());
        assert!(v["scheduledRuns"].get("processed").is_some());
        assert!(v["scheduledRuns"].get("succeeded").is_some());
        assert!(v["scheduledRuns"].get("failed").is_some());
        assert!(v["abandonedCarts"].get("checked").is_some());
        assert!(v["abandonedCarts"].get("emailsSent").is_some());
        assert!(v.get("errors").is_some());
    }
}
