//! # Shoplane Channels
//!
//! Outbound delivery. Today that is one channel: SMTP email.

pub mod email;

pub use email::SmtpMailer;
