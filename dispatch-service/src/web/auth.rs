//! API key verification for write endpoints.
//!
//! Callers send their key in the `x-api-key` header. Several keys may be
//! configured at once so a key can be rotated without downtime. With no key
//! configured every request is refused unless unauthenticated access was
//! explicitly allowed.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Result of checking a request's API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// A configured key matched.
    Allowed,
    /// No keys are configured.
    NotConfigured,
    /// The header is absent or empty.
    Missing,
    /// The header does not match any configured key.
    Invalid,
}

/// Check the `x-api-key` header against the configured keys.
pub fn verify_api_key(configured: &[String], headers: &HeaderMap) -> AuthDecision {
    if !is_api_key_auth_enabled(configured) {
        return AuthDecision::NotConfigured;
    }

    let provided = match headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(key) => key,
        None => return AuthDecision::Missing,
    };

    // Check every key so timing does not reveal which one matched.
    let matched = configured
        .iter()
        .filter(|key| !key.trim().is_empty())
        .fold(false, |matched, key| digest_eq(key, provided) | matched);

    if matched {
        AuthDecision::Allowed
    } else {
        AuthDecision::Invalid
    }
}

/// Compare SHA-256 digests in constant time. Hashing first keeps the
/// comparison independent of the secret's length.
fn digest_eq(expected: &str, provided: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(provided.as_bytes());
    constant_time_compare(&a, &b)
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check if API key auth is enabled.
pub fn is_api_key_auth_enabled(configured: &[String]) -> bool {
    configured.iter().any(|k| !k.trim().is_empty())
}
