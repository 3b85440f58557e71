//! Absorbing subscriptions that vanish mid-operation.
//!
//! Fan-out works from a snapshot of subscriptions while unsubscribe and the
//! expiry sweep delete rows concurrently, so a subscription can disappear
//! between the snapshot and its delivery. That case surfaces as
//! [`HubError::SubscriptionNotFound`] and is turned into a warning plus a
//! no-op. Nothing else is absorbed: storage failures, corrupt rows and
//! transport errors pass through untouched.

use std::future::Future;

use metrics::counter;

use crate::error::{HubError, Result};

/// Convert a vanished-subscription error into `Ok(None)`, logging a warning.
pub fn absorb_race<T>(result: Result<T>, topic: &str, callback: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(HubError::SubscriptionNotFound { .. }) => {
            counter!("websub_races_absorbed_total").increment(1);
            tracing::warn!(
                topic = %topic,
                callback = %callback,
                "Race condition. Subscription '{}, {}' disappeared during this request",
                topic,
                callback
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Run `operation`, treating a vanished `(topic, callback)` subscription as a no-op.
pub async fn race_guarded<T, F>(topic: &str, callback: &str, operation: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    absorb_race(operation.await, topic, callback)
}
