use chrono::Utc;
use reqwest::Client;
use std::time::Duration;

use super::{CheckOutcome, Monitor};
use crate::alerting::failure_tracker::FailureTracker;
use crate::db::models::SubscriberId;
use crate::db::services::StoreError;

/// Runs single checks and hands every outcome to the failure tracker.
pub struct MonitorExecutor {
    client: Client,
    tracker: FailureTracker,
}

impl MonitorExecutor {
    pub fn new(client: Client, tracker: FailureTracker) -> Self {
        Self { client, tracker }
    }

    /// HTTP client shared by all checks.
    ///
    /// `timeout_ceiling` bounds requests whose monitor has no timeout of its
    /// own; a monitor's timeout replaces it for that request.
    pub fn build_client(timeout_ceiling: Duration) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(timeout_ceiling)
            .user_agent(concat!("pulsewatch/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    /// Checks `monitor`, known as `position` in the subscriber's list.
    ///
    /// Only persistence failures surface as errors; every network problem is
    /// an outcome that has already been recorded.
    pub async fn check(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
        monitor: &Monitor,
    ) -> Result<CheckOutcome, StoreError> {
        let outcome = monitor.variant().probe(&self.client).await;
        self.tracker
            .record(subscriber_id, position, monitor, &outcome, Utc::now())
            .await?;
        Ok(outcome)
    }
}
