//! # Shoplane Gateway
//!
//! The HTTP surface. An external scheduler (a cron service, a platform
//! scheduler) hits the tick endpoint with an HMAC-signed request; the
//! gateway verifies the signature, runs one engine tick, and returns the
//! summary.

pub mod auth;
pub mod server;

pub use server::{build_router, start, AppState};
