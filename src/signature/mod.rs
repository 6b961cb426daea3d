//! Per-provider webhook signature verification (C1).
//!
//! The raw request body must be captured before any JSON parsing — every
//! verification strategy here operates on the exact bytes that were signed.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Headers are checked in this order; the first one present selects the
/// verification strategy.
pub const HEADER_PRIORITY: &[&str] = &[
    "X-Hub-Signature-256",
    "X-Hub-Signature",
    "X-Gitlab-Token",
    "X-Gitee-Token",
    "X-Gitea-Signature",
    "X-Gogs-Signature",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// No recognized signature header was present, and the project has a secret.
    AuthMissing,
    AuthFailed(String),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::AuthMissing => write!(f, "no webhook signature header present"),
            VerifyError::AuthFailed(reason) => write!(f, "signature verification failed: {reason}"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// A provider's request headers, abstracted away from any particular HTTP
/// framework so this module stays testable without axum in scope.
pub trait HeaderLookup {
    fn get(&self, name: &str) -> Option<&str>;
}

impl<'a> HeaderLookup for std::collections::HashMap<&'a str, &'a str> {
    fn get(&self, name: &str) -> Option<&str> {
        std::collections::HashMap::get(self, name).copied()
    }
}

/// Verify an inbound webhook request against `secret` using whichever
/// recognized header is present first. `secret` being empty means the
/// project requires no authentication, so verification always succeeds.
pub fn verify(headers: &impl HeaderLookup, secret: &str, raw_body: &[u8]) -> Result<(), VerifyError> {
    if secret.is_empty() {
        return Ok(());
    }

    for name in HEADER_PRIORITY {
        if let Some(value) = headers.get(name) {
            return match *name {
                "X-Hub-Signature-256" => verify_hub_sha256(secret, value, raw_body),
                "X-Hub-Signature" => verify_hub_sha1(secret, value, raw_body),
                "X-Gitlab-Token" => verify_plain_token(secret, value),
                "X-Gitee-Token" => verify_gitee(secret, value, headers.get("X-Gitee-Timestamp")),
                "X-Gitea-Signature" => verify_hex_hmac_sha256(secret, value, raw_body),
                "X-Gogs-Signature" => verify_hex_hmac_sha256(secret, value, raw_body),
                _ => unreachable!(),
            };
        }
    }

    Err(VerifyError::AuthMissing)
}

fn verify_hub_sha256(secret: &str, header: &str, body: &[u8]) -> Result<(), VerifyError> {
    let hex_sig = header
        .strip_prefix("sha256=")
        .ok_or_else(|| VerifyError::AuthFailed("malformed X-Hub-Signature-256".into()))?;
    verify_hex_hmac_sha256(secret, hex_sig, body)
}

fn verify_hub_sha1(secret: &str, header: &str, body: &[u8]) -> Result<(), VerifyError> {
    let hex_sig = header
        .strip_prefix("sha1=")
        .ok_or_else(|| VerifyError::AuthFailed("malformed X-Hub-Signature".into()))?;
    let expected = hex::decode(hex_sig)
        .map_err(|_| VerifyError::AuthFailed("invalid hex in signature".into()))?;
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|_| VerifyError::AuthFailed("invalid secret length".into()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| VerifyError::AuthFailed("hmac-sha1 mismatch".into()))
}

fn verify_hex_hmac_sha256(secret: &str, hex_sig: &str, body: &[u8]) -> Result<(), VerifyError> {
    let expected = hex::decode(hex_sig.trim())
        .map_err(|_| VerifyError::AuthFailed("invalid hex in signature".into()))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerifyError::AuthFailed("invalid secret length".into()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| VerifyError::AuthFailed("hmac-sha256 mismatch".into()))
}

fn verify_plain_token(secret: &str, token: &str) -> Result<(), VerifyError> {
    if bool::from(secret.as_bytes().ct_eq(token.as_bytes())) {
        Ok(())
    } else {
        Err(VerifyError::AuthFailed("token mismatch".into()))
    }
}

/// Gitee tries signature mode first (HMAC-SHA256 over `timestamp\nsecret`,
/// base64-encoded), falling back to plain token equality if the timestamp
/// is absent or the signature doesn't match.
fn verify_gitee(secret: &str, token: &str, timestamp: Option<&str>) -> Result<(), VerifyError> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    if let Some(ts) = timestamp {
        let signed = format!("{ts}\n{secret}");
        if let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) {
            mac.update(signed.as_bytes());
            let expected = mac.finalize().into_bytes();
            let expected_b64 = STANDARD.encode(expected);
            if bool::from(expected_b64.as_bytes().ct_eq(token.as_bytes())) {
                return Ok(());
            }
        }
    }

    verify_plain_token(secret, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sign_sha256(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn github_sha256_round_trips() {
        let body = b"{\"ref\":\"refs/heads/main\"}";
        let sig = format!("sha256={}", sign_sha256("s3cret", body));
        let mut headers = HashMap::new();
        headers.insert("X-Hub-Signature-256", sig.as_str());
        assert!(verify(&headers, "s3cret", body).is_ok());
    }

    #[test]
    fn flipping_a_secret_bit_fails_verification() {
        let body = b"payload";
        let sig = format!("sha256={}", sign_sha256("s3cret", body));
        let mut headers = HashMap::new();
        headers.insert("X-Hub-Signature-256", sig.as_str());
        assert!(verify(&headers, "s4cret", body).is_err());
    }

    #[test]
    fn flipping_a_payload_bit_fails_verification() {
        let body = b"payload";
        let sig = format!("sha256={}", sign_sha256("s3cret", body));
        let mut headers = HashMap::new();
        headers.insert("X-Hub-Signature-256", sig.as_str());
        assert!(verify(&headers, "s3cret", b"payloae").is_err());
    }

    #[test]
    fn missing_header_with_secret_configured_is_auth_missing() {
        let headers: HashMap<&str, &str> = HashMap::new();
        assert_eq!(verify(&headers, "s3cret", b"x"), Err(VerifyError::AuthMissing));
    }

    #[test]
    fn empty_secret_always_succeeds() {
        let headers: HashMap<&str, &str> = HashMap::new();
        assert!(verify(&headers, "", b"x").is_ok());
    }

    #[test]
    fn gitlab_token_is_plain_equality() {
        let mut headers = HashMap::new();
        headers.insert("X-Gitlab-Token", "tk");
        assert!(verify(&headers, "tk", b"anything").is_ok());
        let mut wrong = HashMap::new();
        wrong.insert("X-Gitlab-Token", "nope");
        assert!(verify(&wrong, "tk", b"anything").is_err());
    }

    #[test]
    fn gitea_and_gogs_use_hex_hmac_sha256_without_prefix() {
        let body = b"gitea-payload";
        let sig = sign_sha256("tea-secret", body);
        let mut headers = HashMap::new();
        headers.insert("X-Gitea-Signature", sig.as_str());
        assert!(verify(&headers, "tea-secret", body).is_ok());
    }

    #[test]
    fn gitee_falls_back_to_plain_token_without_timestamp() {
        let mut headers = HashMap::new();
        headers.insert("X-Gitee-Token", "plain-token");
        assert!(verify(&headers, "plain-token", b"body").is_ok());
    }

    #[test]
    fn header_priority_prefers_sha256_over_sha1() {
        assert_eq!(HEADER_PRIORITY[0], "X-Hub-Signature-256");
        assert_eq!(HEADER_PRIORITY[1], "X-Hub-Signature");
    }
}
