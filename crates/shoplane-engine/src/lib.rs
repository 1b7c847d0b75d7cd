//! # Shoplane Engine
//!
//! The execution half of the automation system: the action dispatcher, the
//! scheduled-run processor, the abandoned-cart scanner, and the batch
//! driver that ties them into one cron tick.

pub mod dispatch;
pub mod driver;
pub mod processor;
pub mod scanner;

pub use dispatch::{ActionContext, ActionDispatcher};
pub use driver::{BatchDriver, TickSummary};
pub use processor::{RunBatchStats, RunProcessor};
pub use scanner::{CartScanStats, CartScanner};

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use shoplane_core::error::{Result, ShoplaneError};
    use shoplane_core::traits::Mailer;
    use shoplane_core::types::{Action, Automation, AutomationRecord, Trigger};

    /// Records every send; can be flipped to fail on demand.
    #[derive(Default)]
    pub struct MockMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail: AtomicBool,
    }

    impl MockMailer {
        pub fn failing() -> Self {
            let m = Self::default();
            m.fail.store(true, Ordering::SeqCst);
            m
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ShoplaneError::Channel("smtp unavailable".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    pub fn email_automation(
        store_id: &str,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Automation {
        Automation {
            id: "a-email".into(),
            store_id: store_id.into(),
            trigger: Trigger::OrderCreated,
            action: Action::SendEmail {
                template: None,
                subject: subject.map(String::from),
                body: body.map(String::from),
            },
            delay_minutes: 0,
            is_active: true,
        }
    }

    pub fn cart_automation(
        store_id: &str,
        min_cart_value: Option<f64>,
        delay_minutes: u32,
    ) -> Automation {
        Automation {
            id: "a-cart".into(),
            store_id: store_id.into(),
            trigger: Trigger::CartAbandoned { min_cart_value },
            action: Action::SendEmail {
                template: Some("abandoned_cart".into()),
                subject: None,
                body: None,
            },
            delay_minutes,
            is_active: true,
        }
    }

    pub fn email_automation_record(id: &str, store_id: &str, active: bool) -> AutomationRecord {
        AutomationRecord {
            id: id.into(),
            store_id: store_id.into(),
            trigger_type: "order.created".into(),
            trigger_conditions: json!({}),
            action_type: "send_email".into(),
            action_config: json!({"subject": "Thanks for your order", "body": "We're on it."}),
            delay_minutes: 0,
            is_active: active,
            total_runs: 0,
            total_successes: 0,
            total_failures: 0,
            last_run_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn cart_automation_record(
        id: &str,
        store_id: &str,
        min_cart_value: Option<f64>,
        delay_minutes: u32,
    ) -> AutomationRecord {
        let conditions = match min_cart_value {
            Some(v) => json!({"minCartValue": v}),
            None => json!({}),
        };
        AutomationRecord {
            id: id.into(),
            store_id: store_id.into(),
            trigger_type: "cart.abandoned".into(),
            trigger_conditions: conditions,
            action_type: "send_email".into(),
            action_config: json!({"template": "abandoned_cart"}),
            delay_minutes,
            is_active: true,
            total_runs: 0,
            total_successes: 0,
            total_failures: 0,
            last_run_at: None,
            created_at: Utc::now(),
        }
    }
}
