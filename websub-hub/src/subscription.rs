use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One subscriber's interest in one topic.
///
/// `(topic, callback)` identifies a subscription; subscribing again with the
/// same pair renews it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Resource being watched
    pub topic: String,
    /// Where notifications are delivered
    pub callback: String,
    /// Shared key for signing; `None` means deliveries go out unsigned
    #[serde(skip_serializing)]
    pub secret: Option<Vec<u8>>,
    /// The subscription is inactive at and after this instant
    pub lease_expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.lease_expiry > now
    }
}
