//! Subscription lifecycle as seen by the subscribe/unsubscribe handshake.
//!
//! The HTTP handshake itself (intent verification, request parsing) lives
//! outside this crate; it calls into [`SubscriptionService`] once a request
//! has been verified.

use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::lease::{LeasePolicy, LeaseRequest, check_secret, lease_expiry, parse_lease_seconds};
use crate::store::SubscriptionStore;

pub struct SubscriptionService<S: SubscriptionStore> {
    store: Arc<S>,
    policy: LeasePolicy,
}

impl<S: SubscriptionStore> SubscriptionService<S> {
    pub fn new(store: Arc<S>, policy: LeasePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create or renew a subscription and return the lease granted, in seconds.
    ///
    /// # Errors
    /// - `InvalidLease` if a lease was requested and is not a positive integer,
    ///   or the granted lease ends beyond any representable time
    /// - `SecretTooLarge` if the secret is 200 bytes or more
    /// - `Storage` on I/O failure
    #[tracing::instrument(skip(self, lease, secret), fields(signed = secret.is_some()))]
    pub async fn subscribe(
        &self,
        topic: &str,
        callback: &str,
        lease: Option<LeaseRequest>,
        secret: Option<&[u8]>,
    ) -> Result<u64> {
        let requested = lease.map(parse_lease_seconds).transpose()?;
        check_secret(secret)?;

        let granted = self.policy.grant(requested);
        let expires_at = lease_expiry(Utc::now(), granted)?;

        self.store.upsert(topic, callback, secret, expires_at).await?;
        tracing::info!(requested, granted, lease_expiry = %expires_at, "Subscription accepted");
        Ok(granted)
    }

    /// Remove a subscription. Returns whether one existed.
    #[tracing::instrument(skip(self))]
    pub async fn unsubscribe(&self, topic: &str, callback: &str) -> Result<bool> {
        let removed = self.store.remove(topic, callback).await?;
        if removed {
            tracing::info!("Subscription removed");
        } else {
            tracing::debug!("Unsubscribe for unknown subscription");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rstest::*;
    use std::time::Duration;

    use crate::error::HubError;

    use crate::store::in_memory::InMemoryStore;

    const TOPIC: &str = "https://example.com/feed";
    const CALLBACK: &str = "https://sub.example/cb";

    #[fixture]
    fn service() -> SubscriptionService<InMemoryStore> {
        SubscriptionService::new(Arc::new(InMemoryStore::new()), LeasePolicy::default())
    }

    #[rstest]
    #[tokio::test]
    async fn test_subscribe_grants_requested_lease(service: SubscriptionService<InMemoryStore>) {
        let before = Utc::now();
        let granted = service
            .subscribe(TOPIC, CALLBACK, Some("3600".into()), Some(b"s3cr3t"))
            .await
            .unwrap();
        assert_eq!(granted, 3600);

        let subscription = service.store().get(TOPIC, CALLBACK).await.unwrap();
        assert_eq!(subscription.secret.as_deref(), Some(&b"s3cr3t"[..]));
        assert!(subscription.is_active(before + ChronoDuration::seconds(3599)));
        assert!(!subscription.is_active(Utc::now() + ChronoDuration::seconds(3601)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_subscribe_without_lease_uses_default(service: SubscriptionService<InMemoryStore>) {
        let granted = service.subscribe(TOPIC, CALLBACK, None, None).await.unwrap();
        assert_eq!(granted, 10 * 24 * 60 * 60);
    }

    #[rstest]
    #[case::zero(LeaseRequest::Seconds(0))]
    #[case::negative(LeaseRequest::Text("-5".into()))]
    #[case::garbage(LeaseRequest::Text("soon".into()))]
    #[tokio::test]
    async fn test_subscribe_rejects_invalid_lease(service: SubscriptionService<InMemoryStore>, #[case] lease: LeaseRequest) {
        let err = service.subscribe(TOPIC, CALLBACK, Some(lease), None).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidLease));
        assert_eq!(service.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_lease_is_an_error() {
        let policy = LeasePolicy {
            max: Duration::from_secs(u64::MAX / 4),
            ..LeasePolicy::default()
        };
        let service = SubscriptionService::new(Arc::new(InMemoryStore::new()), policy);

        let err = service
            .subscribe(TOPIC, CALLBACK, Some("9223372036854775807".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidLease));
        assert_eq!(service.store().count().await.unwrap(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_subscribe_rejects_oversized_secret(service: SubscriptionService<InMemoryStore>) {
        let secret = vec![b'x'; 200];
        let err = service.subscribe(TOPIC, CALLBACK, Some(LeaseRequest::Seconds(60)), Some(&secret)).await.unwrap_err();
        assert!(matches!(err, HubError::SecretTooLarge { len: 200 }));
        assert_eq!(service.store().count().await.unwrap(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_unsubscribe(service: SubscriptionService<InMemoryStore>) {
        service.subscribe(TOPIC, CALLBACK, Some(LeaseRequest::Seconds(60)), None).await.unwrap();
        assert!(service.unsubscribe(TOPIC, CALLBACK).await.unwrap());
        assert!(!service.unsubscribe(TOPIC, CALLBACK).await.unwrap());
    }
}
