//! Action Dispatcher — executes one automation action and returns a
//! structured result, or raises a typed `HandlerError`.
//!
//! Dispatch is by the decoded `Action` variant; each handler performs one
//! external side effect (email, order/customer mutation, webhook, CRM
//! record). Handlers never touch raw JSON config — decoding happened at
//! automation load.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use shoplane_core::error::HandlerError;
use shoplane_core::traits::{AutomationStore, Mailer};
use shoplane_core::types::{Action, Automation, TriggerData};

/// Webhook delivery timeout. A slow remote must not eat the tick budget.
const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Everything a handler may need: the decoded automation, the immutable
/// event snapshot, the tenant scope, and an optional resource pointer.
pub struct ActionContext<'a> {
    pub automation: &'a Automation,
    pub trigger_data: &'a TriggerData,
    pub store_id: &'a str,
    pub resource_id: Option<&'a str>,
    pub resource_type: Option<&'a str>,
}

impl<'a> ActionContext<'a> {
    /// Order id from the resource pointer, falling back to the snapshot.
    fn order_id(&self) -> Option<&str> {
        match self.resource_type {
            Some("order") => self.resource_id,
            _ => None,
        }
        .or(self.trigger_data.order_id.as_deref())
    }

    fn customer_id(&self) -> Option<&str> {
        match self.resource_type {
            Some("customer") => self.resource_id,
            _ => None,
        }
        .or(self.trigger_data.customer_id.as_deref())
    }
}

/// The dispatcher owns the outbound capabilities handlers share.
pub struct ActionDispatcher {
    store: Arc<dyn AutomationStore>,
    mailer: Arc<dyn Mailer>,
    http: reqwest::Client,
}

impl ActionDispatcher {
    pub fn new(store: Arc<dyn AutomationStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            store,
            mailer,
            http: reqwest::Client::new(),
        }
    }

    /// Execute the automation's action. Returns the handler-specific result
    /// payload stored on the completed run.
    pub async fn execute(&self, ctx: &ActionContext<'_>) -> Result<Value, HandlerError> {
        match &ctx.automation.action {
            Action::SendEmail {
                template,
                subject,
                body,
            } => self.send_email(ctx, template.as_deref(), subject.as_deref(), body.as_deref())
                .await,
            Action::ChangeOrderStatus { status } => {
                self.change_order_status(ctx, status.as_deref())
            }
            Action::AddCustomerTag { tag_id } => self.mutate_tag(ctx, tag_id, true),
            Action::RemoveCustomerTag { tag_id } => self.mutate_tag(ctx, tag_id, false),
            Action::UpdateMarketingConsent { consent } => self.update_consent(ctx, *consent),
            Action::WebhookCall { url, method } => {
                self.webhook_call(ctx, url.as_deref(), method).await
            }
            Action::CrmCreateTask { title } => self.crm_create_task(ctx, title.as_deref()),
            Action::CrmAddNote { content } => self.crm_add_note(ctx, content.as_deref()),
        }
    }

    async fn send_email(
        &self,
        ctx: &ActionContext<'_>,
        template: Option<&str>,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<Value, HandlerError> {
        let to = ctx
            .trigger_data
            .recipient()
            .ok_or(HandlerError::MissingRecipient)?;

        let (subject, body) = if template == Some("abandoned_cart") {
            build_cart_recovery_email(ctx.trigger_data)
        } else {
            (
                subject.unwrap_or("An update from your store").to_string(),
                body.unwrap_or_default().to_string(),
            )
        };

        self.mailer
            .send(to, &subject, &body)
            .await
            .map_err(|e| HandlerError::Email(e.to_string()))?;

        tracing::info!("📤 Automation email sent to {to}");
        Ok(json!({"emailSent": true, "to": to}))
    }

    fn change_order_status(
        &self,
        ctx: &ActionContext<'_>,
        status: Option<&str>,
    ) -> Result<Value, HandlerError> {
        let order_id = ctx.order_id().ok_or(HandlerError::MissingTarget)?;
        let status = status.ok_or(HandlerError::MissingTarget)?;

        self.store
            .set_order_status(ctx.store_id, order_id, status)
            .map_err(|e| HandlerError::Store(e.to_string()))?;

        Ok(json!({"orderUpdated": true, "orderId": order_id, "newStatus": status}))
    }

    fn mutate_tag(
        &self,
        ctx: &ActionContext<'_>,
        tag_id: &str,
        add: bool,
    ) -> Result<Value, HandlerError> {
        let customer_id = ctx
            .customer_id()
            .ok_or_else(|| HandlerError::CustomerNotFound("no customer id in trigger data".into()))?;

        let exists = self
            .store
            .customer_exists(ctx.store_id, customer_id)
            .map_err(|e| HandlerError::Store(e.to_string()))?;
        if !exists {
            return Err(HandlerError::CustomerNotFound(customer_id.to_string()));
        }

        // Idempotent both ways: adding an existing tag or removing an
        // absent one is a no-op at the store level.
        if add {
            self.store
                .add_customer_tag(ctx.store_id, customer_id, tag_id)
                .map_err(|e| HandlerError::Store(e.to_string()))?;
            Ok(json!({"tagAdded": true, "customerId": customer_id, "tagId": tag_id}))
        } else {
            self.store
                .remove_customer_tag(ctx.store_id, customer_id, tag_id)
                .map_err(|e| HandlerError::Store(e.to_string()))?;
            Ok(json!({"tagRemoved": true, "customerId": customer_id, "tagId": tag_id}))
        }
    }

    fn update_consent(&self, ctx: &ActionContext<'_>, consent: bool) -> Result<Value, HandlerError> {
        let customer_id = ctx
            .customer_id()
            .ok_or_else(|| HandlerError::CustomerNotFound("no customer id in trigger data".into()))?;

        self.store
            .set_marketing_consent(ctx.store_id, customer_id, consent)
            .map_err(|e| HandlerError::Store(e.to_string()))?;

        Ok(json!({"consentUpdated": true, "customerId": customer_id, "consent": consent}))
    }

    async fn webhook_call(
        &self,
        ctx: &ActionContext<'_>,
        url: Option<&str>,
        method: &str,
    ) -> Result<Value, HandlerError> {
        let url = url.ok_or_else(|| {
            HandlerError::InvalidConfig("webhook_call requires a url".into())
        })?;

        let req = match method.to_uppercase().as_str() {
            "PUT" => self.http.put(url),
            "PATCH" => self.http.patch(url),
            "GET" => self.http.get(url),
            _ => self.http.post(url),
        };

        let envelope = json!({
            "event": ctx.automation.trigger.type_tag(),
            "data": ctx.trigger_data,
        });

        // A non-2xx response is the remote's business, not a dispatch
        // failure; only transport-level errors raise.
        let resp = req
            .json(&envelope)
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| HandlerError::Transport(e.to_string()))?;

        Ok(json!({"webhookCalled": true, "statusCode": resp.status().as_u16()}))
    }

    fn crm_create_task(
        &self,
        ctx: &ActionContext<'_>,
        title: Option<&str>,
    ) -> Result<Value, HandlerError> {
        let title = title.unwrap_or("Follow up");
        let task_id = self
            .store
            .create_crm_task(ctx.store_id, ctx.customer_id(), title)
            .map_err(|e| HandlerError::Store(e.to_string()))?;

        Ok(json!({"taskCreated": true, "taskId": task_id}))
    }

    fn crm_add_note(
        &self,
        ctx: &ActionContext<'_>,
        content: Option<&str>,
    ) -> Result<Value, HandlerError> {
        let (Some(customer_id), Some(content)) = (ctx.customer_id(), content) else {
            return Err(HandlerError::MissingContent);
        };

        let note_id = self
            .store
            .create_crm_note(ctx.store_id, customer_id, content)
            .map_err(|e| HandlerError::Store(e.to_string()))?;

        Ok(json!({"noteAdded": true, "noteId": note_id}))
    }
}

/// Build the cart-recovery email from the snapshot's items/subtotal/URL.
fn build_cart_recovery_email(data: &TriggerData) -> (String, String) {
    let mut body = String::from("You left some items in your cart:\n\n");

    if let Some(items) = data.items.as_ref().and_then(|i| i.as_array()) {
        for item in items {
            let name = item["name"].as_str().unwrap_or("Item");
            let qty = item["quantity"].as_u64().unwrap_or(1);
            body.push_str(&format!("  - {name} x{qty}\n"));
        }
    }
    if let Some(subtotal) = data.subtotal {
        body.push_str(&format!("\nSubtotal: {subtotal:.2}\n"));
    }
    if let Some(url) = data.recovery_url.as_deref() {
        body.push_str(&format!("\nFinish your checkout here: {url}\n"));
    }

    ("You left something behind".to_string(), body)
}
