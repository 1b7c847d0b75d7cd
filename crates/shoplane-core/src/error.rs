//! Shoplane error taxonomy.
//!
//! Two layers: `ShoplaneError` for infrastructure-level failures that abort
//! a request (config, data store, auth), and `HandlerError` for per-unit
//! action failures that are recorded on the run and never abort a batch.

use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ShoplaneError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-unit failure raised by an action handler. Caught at the unit
/// boundary, recorded on the run (or cart), and appended to the batch
/// summary — never propagated past the batch loop.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("invalid automation config: {0}")]
    InvalidConfig(String),

    #[error("no recipient email in trigger data")]
    MissingRecipient,

    #[error("missing order id or target status")]
    MissingTarget,

    #[error("customer not found: {0}")]
    CustomerNotFound(String),

    #[error("crm note requires a customer id and content")]
    MissingContent,

    #[error("email send failed: {0}")]
    Email(String),

    #[error("webhook transport failed: {0}")]
    Transport(String),

    #[error("store error during action: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, ShoplaneError>;
