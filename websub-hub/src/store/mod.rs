//! Durable record of subscriptions.
//!
//! Dispatch reads subscriptions while subscribe, unsubscribe and the expiry
//! sweep mutate them, with no lock held across the two. Implementations must
//! let readers proceed while a write is in progress and make every write
//! atomic. A row returned by [`SubscriptionStore::list_active`] may already be
//! gone by the time it is used; callers go through [`crate::race`] for that.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::subscription::Subscription;

pub mod in_memory;
pub mod sqlite;


/// Storage contract for subscriptions keyed by `(topic, callback)`.
pub trait SubscriptionStore: Send + Sync {
    /// Create a subscription, or renew it by replacing secret and expiry.
    ///
    /// # Errors
    /// - `SecretTooLarge` if the secret is 200 bytes or more; nothing is written
    /// - `Storage` on I/O failure
    fn upsert(
        &self,
        topic: &str,
        callback: &str,
        secret: Option<&[u8]>,
        lease_expiry: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete a subscription. Returns whether a row existed.
    fn remove(&self, topic: &str, callback: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Look up a single subscription regardless of its lease.
    ///
    /// # Errors
    /// - `SubscriptionNotFound` if no row exists for the pair
    fn get(&self, topic: &str, callback: &str) -> impl Future<Output = Result<Subscription>> + Send;

    /// Snapshot of the subscriptions for `topic` whose lease ends after `now`.
    fn list_active(&self, topic: &str, now: DateTime<Utc>) -> impl Future<Output = Result<Vec<Subscription>>> + Send;

    /// Delete every subscription whose lease ended at or before `now`.
    fn sweep_expired(&self, now: DateTime<Utc>) -> impl Future<Output = Result<u64>> + Send;

    /// Number of stored subscriptions, active or not.
    fn count(&self) -> impl Future<Output = Result<u64>> + Send;
}
