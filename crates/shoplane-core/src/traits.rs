//! Capability interfaces at the engine's seams.
//!
//! The data store and the email sender are external collaborators; the
//! engine only sees these traits. `shoplane-store` provides the SQLite
//! implementation, `shoplane-channels` the SMTP mailer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{AbandonedCart, AutomationRecord, AutomationRun};

/// Data-store contract consumed by the engine: conditional status-guarded
/// updates (the claim step), bounded batch selects, increment-style counter
/// updates, and audit inserts. All operations are tenant-scoped where a
/// `store_id` appears.
pub trait AutomationStore: Send + Sync {
    // ── Rule Store ──
    fn automation(&self, id: &str) -> Result<Option<AutomationRecord>>;
    /// All active `cart.abandoned` automations, across stores.
    fn active_cart_automations(&self) -> Result<Vec<AutomationRecord>>;
    /// Increment-style counter update: bumps `total_runs`, the matching
    /// success/failure counter, and `last_run_at` in one statement.
    fn record_run_outcome(&self, automation_id: &str, success: bool, now: DateTime<Utc>)
        -> Result<()>;

    // ── Run Ledger ──
    fn insert_run(&self, run: &AutomationRun) -> Result<()>;
    fn run(&self, id: &str) -> Result<Option<AutomationRun>>;
    /// Due runs: `status = scheduled` and `scheduled_for <= now`, oldest
    /// first, capped at `limit`.
    fn due_runs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<AutomationRun>>;
    /// Atomic claim: `scheduled → running` only if still scheduled.
    /// Returns false when another tick won the race.
    fn claim_run(&self, run_id: &str, now: DateTime<Utc>) -> Result<bool>;
    fn cancel_run(&self, run_id: &str, now: DateTime<Utc>) -> Result<()>;
    fn complete_run(
        &self,
        run_id: &str,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()>;
    fn fail_run(&self, run_id: &str, error: &str, now: DateTime<Utc>) -> Result<()>;
    /// Flip runs stuck in `running` since before `cutoff` back to
    /// `scheduled` so a later tick retries them. Returns the count.
    fn reclaim_stale_runs(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // ── Abandoned carts ──
    /// Eligible carts for one store: unrecovered, with an email, created
    /// before `created_before`, under the reminder cap, and last reminded
    /// before `resend_before` (or never). Oldest first, capped at `limit`.
    fn eligible_carts(
        &self,
        store_id: &str,
        created_before: DateTime<Utc>,
        resend_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AbandonedCart>>;
    /// Claim a cart by conditionally setting `reminder_sent_at` (CAS
    /// against the value observed at selection). False = lost the race.
    fn claim_cart_reminder(
        &self,
        cart_id: &str,
        observed_sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
    /// Roll a claim back after a failed send so the cart stays eligible.
    fn release_cart_reminder(
        &self,
        cart_id: &str,
        previous_sent_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    /// Bump `reminder_count` after a successful send (`reminder_sent_at`
    /// was already set by the claim).
    fn confirm_cart_reminder(&self, cart_id: &str) -> Result<()>;

    // ── Handler side effects (order/customer/CRM mutation API) ──
    fn set_order_status(&self, store_id: &str, order_id: &str, status: &str) -> Result<()>;
    fn customer_exists(&self, store_id: &str, customer_id: &str) -> Result<bool>;
    /// Idempotent: adding an existing tag is a no-op.
    fn add_customer_tag(&self, store_id: &str, customer_id: &str, tag_id: &str) -> Result<()>;
    /// Idempotent: removing an absent tag is a no-op.
    fn remove_customer_tag(&self, store_id: &str, customer_id: &str, tag_id: &str) -> Result<()>;
    fn set_marketing_consent(
        &self,
        store_id: &str,
        customer_id: &str,
        consent: bool,
    ) -> Result<()>;
    fn create_crm_task(
        &self,
        store_id: &str,
        customer_id: Option<&str>,
        title: &str,
    ) -> Result<String>;
    fn create_crm_note(&self, store_id: &str, customer_id: &str, content: &str) -> Result<String>;
}

/// Outbound email capability. Template rendering happens in the dispatcher;
/// the mailer only delivers.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}
