use thiserror::Error;

use crate::lease::INVALID_LEASE;

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Coarse classification of a [`HubError`], used to decide who handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed caller input. Surfaced to the requester, never retried.
    Validation,
    /// Recoverable network or capacity failure. Retried with backoff.
    Transient,
    /// A record vanished between snapshot and use. Absorbed by the race guard.
    Race,
    /// Persistence failure. Fatal for the triggering operation.
    Storage,
}

/// Errors that can occur in the hub core.
#[derive(Debug, Error)]
pub enum HubError {
    /// Requested lease is not a positive integer
    #[error("{}", INVALID_LEASE)]
    InvalidLease,

    /// Subscriber secret exceeds the size bound
    #[error("Invalid hub.secret (should be less than 200 bytes, got {len})")]
    SecretTooLarge { len: usize },

    /// Signature algorithm name is not one we support
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Configuration is inconsistent
    #[error("Config validation: {0}")]
    Config(String),

    /// Topic content could not be retrieved this cycle
    #[error("Failed to fetch topic {topic}: {reason}")]
    Fetch {
        topic: String,
        status: Option<u16>,
        reason: String,
    },

    /// Callback did not accept a notification
    #[error("Failed to deliver to {callback}: {reason}")]
    Delivery {
        callback: String,
        status: Option<u16>,
        reason: String,
    },

    /// Work queue is at capacity
    #[error("Job queue is full")]
    QueueFull,

    /// Request could not be built or sent
    #[error("HTTP error: {0}")]
    Http(String),

    /// Subscription disappeared between lookup and use
    #[error("Subscription not found: {topic}, {callback}")]
    SubscriptionNotFound { topic: String, callback: String },

    /// Database operation failed
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Stored data could not be decoded
    #[error("Corrupt subscription row: {0}")]
    Corrupt(String),

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::InvalidLease
            | HubError::SecretTooLarge { .. }
            | HubError::UnsupportedAlgorithm(_)
            | HubError::Config(_) => ErrorKind::Validation,
            HubError::Fetch { .. } | HubError::Delivery { .. } | HubError::QueueFull | HubError::Http(_) => ErrorKind::Transient,
            HubError::SubscriptionNotFound { .. } => ErrorKind::Race,
            HubError::Storage(_) | HubError::Corrupt(_) | HubError::Other(_) => ErrorKind::Storage,
        }
    }

    /// Whether the worker pool should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn not_found(topic: &str, callback: &str) -> Self {
        HubError::SubscriptionNotFound {
            topic: topic.to_string(),
            callback: callback.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_lease_message_is_stable() {
        assert_eq!(
            HubError::InvalidLease.to_string(),
            "Invalid hub.lease_seconds (should be a positive integer)"
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(HubError::InvalidLease.kind(), ErrorKind::Validation);
        assert_eq!(HubError::SecretTooLarge { len: 300 }.kind(), ErrorKind::Validation);
        assert_eq!(HubError::UnsupportedAlgorithm("md5".into()).kind(), ErrorKind::Validation);
        assert_eq!(HubError::not_found("t", "c").kind(), ErrorKind::Race);
        assert_eq!(HubError::Storage(sqlx::Error::PoolTimedOut).kind(), ErrorKind::Storage);

        let fetch = HubError::Fetch {
            topic: "https://example.com/feed".into(),
            status: Some(503),
            reason: "HTTP 503".into(),
        };
        assert!(fetch.is_retryable());
        assert!(!HubError::InvalidLease.is_retryable());
        assert!(!HubError::Corrupt("bad".into()).is_retryable());
    }
}
