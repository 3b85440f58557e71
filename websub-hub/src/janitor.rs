//! Periodic removal of subscriptions whose lease has run out.
//!
//! Expired rows are already invisible to fan-out; sweeping only reclaims space.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::store::SubscriptionStore;

pub async fn run_janitor<S: SubscriptionStore>(store: Arc<S>, sweep_interval: Duration, shutdown: CancellationToken) {
    tracing::info!(sweep_interval = ?sweep_interval, "Starting lease janitor");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(sweep_interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Lease janitor shutting down");
                return;
            }
        }

        match store.sweep_expired(Utc::now()).await {
            Ok(0) => tracing::debug!("No expired subscriptions"),
            Ok(swept) => {
                counter!("websub_subscriptions_swept_total").increment(swept);
                tracing::info!(swept, "Swept expired subscriptions");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to sweep expired subscriptions");
            }
        }
    }
}
