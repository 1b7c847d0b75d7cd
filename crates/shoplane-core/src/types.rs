//! Domain model for the automation engine.
//!
//! Automations are stored as raw rows (`trigger_type` + JSON conditions,
//! `action_type` + JSON config) because the admin UI writes them that way.
//! The engine decodes a row into the tagged `Trigger`/`Action` unions once,
//! at load time — handlers never poke at untyped JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// Hard cap on reminder emails per abandoned cart.
pub const MAX_CART_REMINDERS: u32 = 3;

/// Minimum hours between two reminders for the same cart.
pub const REMINDER_RESEND_FLOOR_HOURS: i64 = 24;

// ─── Automation (Rule Store) ───────────────────────────────────

/// An automation row as persisted: raw trigger/action tags plus opaque
/// JSON config, with running statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRecord {
    pub id: String,
    /// Tenant scope — every query and action is store-scoped.
    pub store_id: String,
    /// e.g. "order.paid", "cart.abandoned"
    pub trigger_type: String,
    pub trigger_conditions: serde_json::Value,
    /// e.g. "send_email", "webhook_call"
    pub action_type: String,
    pub action_config: serde_json::Value,
    /// Delay between event and execution; for `cart.abandoned` the minimum
    /// cart age before a cart is eligible.
    pub delay_minutes: u32,
    pub is_active: bool,
    pub total_runs: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AutomationRecord {
    /// Decode the raw row into the typed model. Fails with a per-unit
    /// `HandlerError` (unknown tag, malformed config) so the caller can
    /// record the failure on the run instead of crashing the batch.
    pub fn decode(&self) -> Result<Automation, HandlerError> {
        Ok(Automation {
            id: self.id.clone(),
            store_id: self.store_id.clone(),
            trigger: Trigger::decode(&self.trigger_type, &self.trigger_conditions)?,
            action: Action::decode(&self.action_type, &self.action_config)?,
            delay_minutes: self.delay_minutes,
            is_active: self.is_active,
        })
    }
}

/// A decoded automation: typed trigger and action, ready to execute.
#[derive(Debug, Clone)]
pub struct Automation {
    pub id: String,
    pub store_id: String,
    pub trigger: Trigger,
    pub action: Action,
    pub delay_minutes: u32,
    pub is_active: bool,
}

/// What event the automation reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    OrderCreated,
    OrderPaid,
    CartAbandoned { min_cart_value: Option<f64> },
    CustomerCreated,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CartConditions {
    min_cart_value: Option<f64>,
}

impl Trigger {
    pub fn decode(trigger_type: &str, conditions: &serde_json::Value) -> Result<Self, HandlerError> {
        match trigger_type {
            "order.created" => Ok(Self::OrderCreated),
            "order.paid" => Ok(Self::OrderPaid),
            "customer.created" => Ok(Self::CustomerCreated),
            "cart.abandoned" => {
                let c: CartConditions = serde_json::from_value(conditions.clone())
                    .map_err(|e| HandlerError::InvalidConfig(format!("trigger conditions: {e}")))?;
                Ok(Self::CartAbandoned {
                    min_cart_value: c.min_cart_value,
                })
            }
            other => Err(HandlerError::InvalidConfig(format!(
                "unknown trigger type: {other}"
            ))),
        }
    }

    /// The wire tag, used in webhook envelopes and run audit records.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderPaid => "order.paid",
            Self::CartAbandoned { .. } => "cart.abandoned",
            Self::CustomerCreated => "customer.created",
        }
    }
}

/// What the automation does when it fires — one variant per handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendEmail {
        template: Option<String>,
        subject: Option<String>,
        body: Option<String>,
    },
    ChangeOrderStatus {
        status: Option<String>,
    },
    AddCustomerTag {
        tag_id: String,
    },
    RemoveCustomerTag {
        tag_id: String,
    },
    UpdateMarketingConsent {
        consent: bool,
    },
    WebhookCall {
        url: Option<String>,
        method: String,
    },
    CrmCreateTask {
        title: Option<String>,
    },
    CrmAddNote {
        content: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SendEmailConfig {
    template: Option<String>,
    subject: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct OrderStatusConfig {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagConfig {
    tag_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConsentConfig {
    consent: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WebhookConfig {
    url: Option<String>,
    method: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CrmTaskConfig {
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CrmNoteConfig {
    content: Option<String>,
}

impl Action {
    pub fn decode(action_type: &str, config: &serde_json::Value) -> Result<Self, HandlerError> {
        fn cfg<T: serde::de::DeserializeOwned>(v: &serde_json::Value) -> Result<T, HandlerError> {
            serde_json::from_value(v.clone())
                .map_err(|e| HandlerError::InvalidConfig(format!("action config: {e}")))
        }

        match action_type {
            "send_email" => {
                let c: SendEmailConfig = cfg(config)?;
                Ok(Self::SendEmail {
                    template: c.template,
                    subject: c.subject,
                    body: c.body,
                })
            }
            "change_order_status" => {
                let c: OrderStatusConfig = cfg(config)?;
                Ok(Self::ChangeOrderStatus { status: c.status })
            }
            "add_customer_tag" => {
                let c: TagConfig = cfg(config)?;
                Ok(Self::AddCustomerTag { tag_id: c.tag_id })
            }
            "remove_customer_tag" => {
                let c: TagConfig = cfg(config)?;
                Ok(Self::RemoveCustomerTag { tag_id: c.tag_id })
            }
            "update_marketing_consent" => {
                let c: ConsentConfig = cfg(config)?;
                Ok(Self::UpdateMarketingConsent { consent: c.consent })
            }
            "webhook_call" => {
                let c: WebhookConfig = cfg(config)?;
                Ok(Self::WebhookCall {
                    url: c.url,
                    method: c.method.unwrap_or_else(|| "POST".into()),
                })
            }
            "crm.create_task" => {
                let c: CrmTaskConfig = cfg(config)?;
                Ok(Self::CrmCreateTask { title: c.title })
            }
            "crm.add_note" => {
                let c: CrmNoteConfig = cfg(config)?;
                Ok(Self::CrmAddNote { content: c.content })
            }
            other => Err(HandlerError::UnknownActionType(other.to_string())),
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::SendEmail { .. } => "send_email",
            Self::ChangeOrderStatus { .. } => "change_order_status",
            Self::AddCustomerTag { .. } => "add_customer_tag",
            Self::RemoveCustomerTag { .. } => "remove_customer_tag",
            Self::UpdateMarketingConsent { .. } => "update_marketing_consent",
            Self::WebhookCall { .. } => "webhook_call",
            Self::CrmCreateTask { .. } => "crm.create_task",
            Self::CrmAddNote { .. } => "crm.add_note",
        }
    }
}

// ─── AutomationRun (Run Ledger) ────────────────────────────────

/// Run status state machine:
/// `Scheduled → Running → {Completed | Failed}`; `Scheduled → Cancelled`.
/// Terminal states are permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of the event context at run creation time. Immutable once
/// created — the automation's live config, or the referenced resource, may
/// change or disappear before execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TriggerData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_url: Option<String>,
    /// Anything else the event producer snapshotted; kept for audit
    /// fidelity and webhook payloads.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TriggerData {
    /// Recipient resolution order for email actions.
    pub fn recipient(&self) -> Option<&str> {
        self.customer_email.as_deref().or(self.email.as_deref())
    }
}

/// One attempted or scheduled execution of an automation's action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRun {
    pub id: String,
    pub automation_id: String,
    /// Denormalized for scan efficiency.
    pub store_id: String,
    pub trigger_data: TriggerData,
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub status: RunStatus,
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AutomationRun {
    /// Create a new run in `Scheduled` state.
    pub fn scheduled(
        automation_id: &str,
        store_id: &str,
        trigger_data: TriggerData,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            automation_id: automation_id.to_string(),
            store_id: store_id.to_string(),
            trigger_data,
            resource_id: None,
            resource_type: None,
            status: RunStatus::Scheduled,
            scheduled_for,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Create a `Completed` audit record for an action that was executed
    /// immediately (the abandoned-cart path has no pre-scheduled run).
    pub fn completed_audit(
        automation_id: &str,
        store_id: &str,
        trigger_data: TriggerData,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            automation_id: automation_id.to_string(),
            store_id: store_id.to_string(),
            trigger_data,
            resource_id: None,
            resource_type: None,
            status: RunStatus::Completed,
            scheduled_for: now,
            started_at: Some(now),
            completed_at: Some(now),
            result: Some(result),
            error: None,
            created_at: now,
        }
    }
}

// ─── AbandonedCart ─────────────────────────────────────────────

/// A cart left behind at checkout; scanned by the abandoned-cart trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonedCart {
    pub id: String,
    pub store_id: String,
    pub email: Option<String>,
    pub items: serde_json::Value,
    pub subtotal: f64,
    pub recovery_token: String,
    pub created_at: DateTime<Utc>,
    /// Set by the checkout flow when the customer completes the purchase.
    pub recovered_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub reminder_count: u32,
}
