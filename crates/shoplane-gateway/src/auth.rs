//! Cron request authentication.
//!
//! The scheduler signs the request path with HMAC-SHA256 under a shared
//! secret and sends the hex digest in `X-Cron-Signature`. Verification is
//! constant-time via `Mac::verify_slice`. An empty secret disables auth
//! entirely (local development only).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the scheduler's signature.
pub const SIGNATURE_HEADER: &str = "x-cron-signature";

/// Check a hex-encoded HMAC-SHA256 signature over `path`.
pub fn verify_signature(secret: &str, path: &str, signature_hex: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC key of any length is valid");
    mac.update(path.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

/// Produce the signature a well-behaved scheduler would send.
pub fn sign(secret: &str, path: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC key of any length is valid");
    mac.update(path.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let sig = sign("s3cret", "/api/cron/automations");
        assert!(verify_signature("s3cret", "/api/cron/automations", &sig));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = sign("other", "/api/cron/automations");
        assert!(!verify_signature("s3cret", "/api/cron/automations", &sig));
    }

    #[test]
    fn test_wrong_path_rejected() {
        let sig = sign("s3cret", "/api/health");
        assert!(!verify_signature("s3cret", "/api/cron/automations", &sig));
    }

    #[test]
    fn test_garbage_signature_rejected() {
        assert!(!verify_signature("s3cret", "/api/cron/automations", "not-hex"));
        assert!(!verify_signature("s3cret", "/api/cron/automations", ""));
    }

    #[test]
    fn test_empty_secret_disables_auth() {
        assert!(verify_signature("", "/api/cron/automations", "anything"));
    }
}
