//! Per-(subscriber, position) failure streaks and notification suppression.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::models::{MonitorState, SubscriberId};
use crate::db::services::{MonitorStore, StoreError};
use crate::monitors::{CheckOutcome, Monitor};
use crate::notifications::{Notifier, ParseMode};

pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;
pub const DEFAULT_SUPPRESSION_MINUTES: i64 = 5;

/// When a failing monitor is worth a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressionPolicy {
    /// Consecutive failures needed before the first notification.
    pub failure_threshold: u64,
    /// Quiet period after each notification.
    pub suppression_window: Duration,
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            suppression_window: Duration::minutes(DEFAULT_SUPPRESSION_MINUTES),
        }
    }
}

/// Effect of one outcome on a monitor's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Success: streak and suppression cleared.
    Reset,
    /// Failure counted, nothing sent.
    Counted,
    /// Failure counted and a notification is due.
    Notified,
}

impl SuppressionPolicy {
    /// Advances `state` by one outcome observed at `now`.
    pub fn apply(&self, state: &mut MonitorState, succeeded: bool, now: DateTime<Utc>) -> Transition {
        if succeeded {
            state.streak = 0;
            state.suppressed_until = None;
            return Transition::Reset;
        }

        state.streak = state.streak.saturating_add(1);
        let window_open = state.suppressed_until.is_none_or(|until| now >= until);
        if state.streak >= self.failure_threshold && window_open {
            state.suppressed_until = Some(
                now.checked_add_signed(self.suppression_window)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            );
            Transition::Notified
        } else {
            Transition::Counted
        }
    }
}

/// Applies check outcomes to stored state and sends the notifications they call for.
pub struct FailureTracker {
    store: Arc<dyn MonitorStore>,
    notifier: Arc<dyn Notifier>,
    policy: SuppressionPolicy,
}

impl FailureTracker {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        notifier: Arc<dyn Notifier>,
        policy: SuppressionPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// Records `outcome` for the monitor at `position`. State is saved on every
    /// path, and a notification is only sent once its window has been saved.
    pub async fn record(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
        monitor: &Monitor,
        outcome: &CheckOutcome,
        now: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut state = self
            .store
            .get_or_create_monitor_state(subscriber_id, position)
            .await?;
        let transition = self.policy.apply(&mut state, outcome.is_success(), now);
        let variant = monitor.variant();

        match outcome {
            CheckOutcome::Success => {
                debug!(
                    subscriber_id,
                    position,
                    monitor = variant.name(),
                    endpoint = variant.target(),
                    "Check passed."
                );
            }
            CheckOutcome::Failure(failure) => {
                warn!(
                    subscriber_id,
                    position,
                    monitor = variant.name(),
                    endpoint = variant.target(),
                    kind = failure.kind(),
                    streak = state.streak,
                    "Check failed."
                );
            }
        }

        // The window must be stored before anything is sent.
        self.store.save_monitor_state(&state).await?;

        if let (Transition::Notified, CheckOutcome::Failure(failure)) = (transition, outcome) {
            info!(subscriber_id, position, streak = state.streak, "Notifying subscriber.");
            self.notifier.send_message(
                subscriber_id,
                variant.failure_message(failure),
                ParseMode::Markdown,
            );
        }

        Ok(transition)
    }
}
