//! # Shoplane Store
//!
//! SQLite implementation of the engine's data-store contract: the Rule
//! Store (automations + statistics), the Run Ledger, abandoned carts, and
//! the thin customer/order/CRM tables the action handlers mutate.

pub mod db;

pub use db::SqliteStore;
