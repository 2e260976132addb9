//! Expiry inspection for session access tokens.
//!
//! Tokens are decoded without signature verification; only the `exp` claim
//! is read. Anything that cannot be decoded is treated as not expired and
//! left for the server to reject.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<serde_json::Value>,
}

/// Returns the `exp` claim in seconds since the epoch.
///
/// A missing, zero or non-numeric claim yields `None`.
#[must_use]
pub fn expiry(token: &str) -> Option<f64> {
    let payload = token.split('.').nth(1)?;
    let bytes = decode_segment(payload)?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims
        .exp
        .and_then(|exp| exp.as_f64())
        .filter(|exp| *exp != 0.0)
}

/// Returns true if the token expires within `skew` of now.
#[must_use]
pub fn is_expired(token: &str, skew: Duration) -> bool {
    is_expired_at(token, skew, Utc::now())
}

/// Returns true if the token expires within `skew` of `now`.
#[must_use]
pub fn is_expired_at(token: &str, skew: Duration, now: DateTime<Utc>) -> bool {
    let threshold = now.timestamp() as f64 + skew.as_secs_f64();
    expiry(token).is_some_and(|exp| exp <= threshold)
}

// Accepts both base64url and standard alphabets, with or without padding.
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let normalized: String = segment
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    URL_SAFE_NO_PAD.decode(normalized).ok()
}
