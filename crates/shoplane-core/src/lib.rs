//! # Shoplane Core
//!
//! Shared foundation for the automation engine: configuration, the error
//! taxonomy, and the domain model (automations, runs, abandoned carts).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ShoplaneConfig;
pub use traits::{AutomationStore, Mailer};
pub use error::{HandlerError, Result, ShoplaneError};
pub use types::{
    AbandonedCart, Action, Automation, AutomationRecord, AutomationRun, RunStatus, Trigger,
    TriggerData, MAX_CART_REMINDERS, REMINDER_RESEND_FLOOR_HOURS,
};
