//! Lease and secret validation for subscribe requests.
//!
//! [`parse_lease_seconds`] is the identity on positive integers (saturating
//! above `u64::MAX`) and rejects everything else. How long a subscriber actually gets is decided separately
//! by [`LeasePolicy::grant`], so a validated value is never silently altered.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// Message returned to the requester when `hub.lease_seconds` is rejected.
pub const INVALID_LEASE: &str = "Invalid hub.lease_seconds (should be a positive integer)";

/// Secrets of this many bytes or more are refused.
pub const MAX_SECRET_BYTES: usize = 200;

const A_MINUTE: u64 = 60;
const A_DAY: u64 = A_MINUTE * 60 * 24;

/// Raw lease duration as received from a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseRequest {
    Text(String),
    Seconds(i64),
}

impl From<&str> for LeaseRequest {
    fn from(value: &str) -> Self {
        LeaseRequest::Text(value.to_string())
    }
}

impl From<String> for LeaseRequest {
    fn from(value: String) -> Self {
        LeaseRequest::Text(value)
    }
}

impl From<i64> for LeaseRequest {
    fn from(value: i64) -> Self {
        LeaseRequest::Seconds(value)
    }
}

impl From<i32> for LeaseRequest {
    fn from(value: i32) -> Self {
        LeaseRequest::Seconds(value.into())
    }
}

impl From<u32> for LeaseRequest {
    fn from(value: u32) -> Self {
        LeaseRequest::Seconds(value.into())
    }
}

/// Validate a requested lease into a strictly positive number of seconds.
pub fn parse_lease_seconds(raw: impl Into<LeaseRequest>) -> Result<u64> {
    let seconds = match raw.into() {
        LeaseRequest::Seconds(n) => u64::try_from(n).map_err(|_| HubError::InvalidLease)?,
        LeaseRequest::Text(text) => parse_decimal(&text).ok_or(HubError::InvalidLease)?,
    };

    if seconds == 0 {
        return Err(HubError::InvalidLease);
    }
    Ok(seconds)
}

/// Unsigned decimal with an optional `+`, surrounding whitespace allowed.
/// Values beyond `u64::MAX` saturate; [`LeasePolicy::grant`] clamps them anyway.
fn parse_decimal(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text.strip_prefix('+').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}

/// Absolute expiry of a lease of `seconds` starting at `now`.
///
/// # Errors
/// - `InvalidLease` if the expiry is beyond what a timestamp can represent
pub fn lease_expiry(now: DateTime<Utc>, seconds: u64) -> Result<DateTime<Utc>> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lease| now.checked_add_signed(lease))
        .ok_or(HubError::InvalidLease)
}

/// True when the secret is too large to be stored.
pub fn secret_too_big(secret: &[u8]) -> bool {
    secret.len() >= MAX_SECRET_BYTES
}

/// Reject oversized secrets before they reach the store.
pub fn check_secret(secret: Option<&[u8]>) -> Result<()> {
    match secret {
        Some(secret) if secret_too_big(secret) => Err(HubError::SecretTooLarge { len: secret.len() }),
        _ => Ok(()),
    }
}

/// Bounds applied to validated lease requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeasePolicy {
    /// Lease granted when the subscriber does not ask for one (default: 10 days)
    #[serde(with = "humantime_serde")]
    pub default: Duration,
    /// Shortest lease granted (default: 1 minute)
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    /// Longest lease granted (default: 30 days)
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(10 * A_DAY),
            min: Duration::from_secs(A_MINUTE),
            max: Duration::from_secs(30 * A_DAY),
        }
    }
}

impl LeasePolicy {
    /// Seconds actually granted for an already validated request.
    pub fn grant(&self, requested: Option<u64>) -> u64 {
        let min = self.min.as_secs().max(1);
        let max = self.max.as_secs().max(min);
        match requested {
            None => self.default.as_secs().clamp(min, max),
            Some(seconds) => seconds.clamp(min, max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_integers_round_trip() {
        for n in [1i64, 2, 59, 3600, 864_000, i64::MAX] {
            assert_eq!(parse_lease_seconds(n.to_string()).unwrap(), n as u64);
            assert_eq!(parse_lease_seconds(n).unwrap(), n as u64);
        }
    }

    #[test]
    fn test_rejects_non_positive_and_garbage() {
        for raw in ["0", "-1", "-3600", "", "   ", "abc", "1.5", "3600s", "1e3", "0x10", "+", "+-5", "00"] {
            let err = parse_lease_seconds(raw).unwrap_err();
            assert!(matches!(err, HubError::InvalidLease), "accepted {raw:?}");
            assert_eq!(err.to_string(), INVALID_LEASE);
        }
        assert!(matches!(parse_lease_seconds(0i64), Err(HubError::InvalidLease)));
        assert!(matches!(parse_lease_seconds(-5i32), Err(HubError::InvalidLease)));
    }

    #[test]
    fn test_huge_positive_integers_saturate() {
        assert_eq!(parse_lease_seconds("18446744073709551615").unwrap(), u64::MAX);
        assert_eq!(parse_lease_seconds("99999999999999999999").unwrap(), u64::MAX);
        assert_eq!(LeasePolicy::default().grant(Some(u64::MAX)), 30 * A_DAY);
    }

    #[test]
    fn test_lease_expiry_is_checked() {
        let now = Utc::now();
        assert_eq!(lease_expiry(now, 3600).unwrap(), now + TimeDelta::seconds(3600));
        assert!(matches!(lease_expiry(now, i64::MAX as u64), Err(HubError::InvalidLease)));
        assert!(matches!(lease_expiry(now, u64::MAX), Err(HubError::InvalidLease)));
    }

    #[test]
    fn test_tolerates_surrounding_whitespace() {
        assert_eq!(parse_lease_seconds(" 60 ").unwrap(), 60);
        assert_eq!(parse_lease_seconds("+60").unwrap(), 60);
    }

    #[test]
    fn test_secret_size_boundary() {
        assert!(!secret_too_big(&[]));
        assert!(!secret_too_big(&[b'a'; 199]));
        assert!(secret_too_big(&[b'a'; 200]));
        assert!(secret_too_big(&[b'a'; 201]));

        assert!(check_secret(None).is_ok());
        assert!(check_secret(Some(b"s3cr3t")).is_ok());
        assert!(matches!(
            check_secret(Some(&[0u8; 200])),
            Err(HubError::SecretTooLarge { len: 200 })
        ));
    }

    #[test]
    fn test_policy_grant() {
        let policy = LeasePolicy::default();
        assert_eq!(policy.grant(None), 10 * A_DAY);
        assert_eq!(policy.grant(Some(3600)), 3600);
        assert_eq!(policy.grant(Some(1)), A_MINUTE);
        assert_eq!(policy.grant(Some(365 * A_DAY)), 30 * A_DAY);
    }
}
