//! In-memory subscription store.
//!
//! Suitable for tests and single-process hubs that can afford to lose their
//! subscriptions on restart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{HubError, Result};
use crate::lease::check_secret;
use crate::subscription::Subscription;

use super::SubscriptionStore;

type Key = (String, String);

/// Subscriptions held in a `RwLock`ed map: any number of readers, one writer,
/// and each call holds the lock only for its own duration.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    subscriptions: Arc<RwLock<HashMap<Key, Subscription>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(topic: &str, callback: &str) -> Key {
    (topic.to_string(), callback.to_string())
}

impl SubscriptionStore for InMemoryStore {
    async fn upsert(&self, topic: &str, callback: &str, secret: Option<&[u8]>, lease_expiry: DateTime<Utc>) -> Result<()> {
        check_secret(secret)?;

        let now = Utc::now();
        let secret = secret.map(<[u8]>::to_vec);
        let mut subscriptions = self.subscriptions.write();

        subscriptions
            .entry(key(topic, callback))
            .and_modify(|existing| {
                existing.secret = secret.clone();
                existing.lease_expiry = lease_expiry;
                existing.updated_at = now;
            })
            .or_insert_with(|| Subscription {
                topic: topic.to_string(),
                callback: callback.to_string(),
                secret: secret.clone(),
                lease_expiry,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn remove(&self, topic: &str, callback: &str) -> Result<bool> {
        Ok(self.subscriptions.write().remove(&key(topic, callback)).is_some())
    }

    async fn get(&self, topic: &str, callback: &str) -> Result<Subscription> {
        self.subscriptions
            .read()
            .get(&key(topic, callback))
            .cloned()
            .ok_or_else(|| HubError::not_found(topic, callback))
    }

    async fn list_active(&self, topic: &str, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.topic == topic && s.is_active(now))
            .cloned()
            .collect())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|_, s| s.is_active(now));
        Ok((before - subscriptions.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.subscriptions.read().len() as u64)
    }
}
