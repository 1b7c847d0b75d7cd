//! Abandoned-Cart Scanner — turns lingering carts into recovery emails.
//!
//! Unlike scheduled runs, carts have no pre-created ledger entry: the
//! scanner selects eligible carts per active `cart.abandoned` automation,
//! claims each one by conditionally stamping `reminder_sent_at`, sends the
//! recovery email, and writes a completed audit run after the fact. A
//! failed send rolls the claim back so the cart stays eligible.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use shoplane_core::error::Result;
use shoplane_core::traits::AutomationStore;
use shoplane_core::types::{
    AbandonedCart, Action, Automation, AutomationRun, Trigger, TriggerData,
    REMINDER_RESEND_FLOOR_HOURS,
};

use crate::dispatch::{ActionContext, ActionDispatcher};

/// Where the storefront resumes an abandoned checkout.
const RECOVERY_BASE_URL: &str = "https://checkout.shoplane.app";

/// Outcome counters for one cart-scan pass.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CartScanStats {
    /// Carts pulled from eligibility queries across all automations.
    #[serde(rename = "checked")]
    pub carts_checked: u64,
    pub emails_sent: u64,
    pub failed: u64,
}

pub struct CartScanner {
    store: Arc<dyn AutomationStore>,
    dispatcher: Arc<ActionDispatcher>,
}

impl CartScanner {
    pub fn new(store: Arc<dyn AutomationStore>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Scan on behalf of every active `cart.abandoned` automation. Each
    /// automation is processed independently; a bad one (or a failing
    /// store underneath it) lands in `errors` and the pass continues.
    pub async fn scan(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        errors: &mut Vec<String>,
    ) -> Result<CartScanStats> {
        let automations = self.store.active_cart_automations()?;
        let mut stats = CartScanStats::default();

        for record in automations {
            let automation = match record.decode() {
                Ok(a) => a,
                Err(e) => {
                    errors.push(format!("automation {}: {e}", record.id));
                    continue;
                }
            };

            // Cart recovery only makes sense as an email. Anything else is
            // a misconfigured rule: skip it loudly, don't fail the tick.
            if !matches!(automation.action, Action::SendEmail { .. }) {
                tracing::warn!(
                    "⚠️ Automation {} pairs cart.abandoned with a non-email action, skipping",
                    automation.id
                );
                continue;
            }

            if let Err(e) = self
                .scan_for_automation(&automation, now, limit, &mut stats, errors)
                .await
            {
                errors.push(format!("automation {}: {e}", automation.id));
            }
        }

        Ok(stats)
    }

    async fn scan_for_automation(
        &self,
        automation: &Automation,
        now: DateTime<Utc>,
        limit: usize,
        stats: &mut CartScanStats,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let min_cart_value = match automation.trigger {
            Trigger::CartAbandoned { min_cart_value } => min_cart_value,
            _ => None,
        };

        // A cart must have sat for the automation's delay, and must not
        // have been reminded within the resend floor.
        let created_before = now - Duration::minutes(i64::from(automation.delay_minutes));
        let resend_before = now - Duration::hours(REMINDER_RESEND_FLOOR_HOURS);

        let carts = self
            .store
            .eligible_carts(&automation.store_id, created_before, resend_before, limit)?;

        for cart in carts {
            stats.carts_checked += 1;

            if let Some(min) = min_cart_value {
                if cart.subtotal < min {
                    continue;
                }
            }

            // Claim before sending so a concurrent scanner can't double-mail
            // the same cart.
            if !self
                .store
                .claim_cart_reminder(&cart.id, cart.reminder_sent_at, now)?
            {
                tracing::debug!("Cart {} claimed by a concurrent scan", cart.id);
                continue;
            }

            match self.send_reminder(automation, &cart, now).await {
                Ok(()) => stats.emails_sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    errors.push(format!("cart {}: {e}", cart.id));
                }
            }
        }

        Ok(())
    }

    async fn send_reminder(
        &self,
        automation: &Automation,
        cart: &AbandonedCart,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let trigger_data = cart_trigger_data(cart);
        let ctx = ActionContext {
            automation,
            trigger_data: &trigger_data,
            store_id: &automation.store_id,
            resource_id: Some(&cart.id),
            resource_type: Some("cart"),
        };

        match self.dispatcher.execute(&ctx).await {
            Ok(result) => {
                self.store.confirm_cart_reminder(&cart.id)?;
                let audit = AutomationRun::completed_audit(
                    &automation.id,
                    &automation.store_id,
                    trigger_data,
                    result,
                    now,
                );
                self.store.insert_run(&audit)?;
                self.store
                    .record_run_outcome(&automation.id, true, Utc::now())?;
                tracing::info!("✅ Recovery email sent for cart {}", cart.id);
                Ok(())
            }
            Err(e) => {
                // Roll the claim back so a later pass retries the cart.
                self.store
                    .release_cart_reminder(&cart.id, cart.reminder_sent_at)?;
                self.store
                    .record_run_outcome(&automation.id, false, Utc::now())?;
                Err(e.into())
            }
        }
    }
}

/// Snapshot the cart into the event shape handlers and webhooks expect.
fn cart_trigger_data(cart: &AbandonedCart) -> TriggerData {
    let mut extra = serde_json::Map::new();
    extra.insert("cartId".into(), serde_json::Value::String(cart.id.clone()));

    TriggerData {
        customer_email: None,
        email: cart.email.clone(),
        customer_id: None,
        order_id: None,
        items: Some(cart.items.clone()),
        subtotal: Some(cart.subtotal),
        recovery_url: Some(format!(
            "{RECOVERY_BASE_URL}/{}/recover/{}",
            cart.store_id, cart.recovery_token
        )),
        extra,
    }
}
