//! Edits to a subscriber's monitor list, for whatever front-end accepts commands.
//!
//! Every document is decoded before it is stored, so the list only ever holds
//! canonical encodings of known variants. Failure state is keyed by position and
//! is left alone on edits, so an edited monitor keeps its streak.

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use super::{MonitorStore, StoreError};
use crate::db::models::SubscriberId;
use crate::monitors::{DecodeError, Monitor};

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No monitor at position {position} (list has {len})")]
    PositionOutOfRange { position: usize, len: usize },
}

/// Appends a monitor and returns the updated listing.
pub async fn add_monitor(
    store: &dyn MonitorStore,
    subscriber_id: SubscriberId,
    document: &Value,
) -> Result<String, SubscriptionError> {
    let monitor = Monitor::decode(document)?;
    let mut subscriber = store.get_or_create_subscriber(subscriber_id).await?;
    subscriber.monitors.push(monitor.encode());
    store.save_subscriber(&subscriber).await?;
    info!(
        subscriber_id,
        position = subscriber.monitors.len() - 1,
        "Monitor added."
    );
    Ok(render_monitor_list(&subscriber.monitors))
}

/// Replaces the monitor at `position` in place. Its failure state carries over.
pub async fn edit_monitor(
    store: &dyn MonitorStore,
    subscriber_id: SubscriberId,
    position: usize,
    document: &Value,
) -> Result<String, SubscriptionError> {
    let monitor = Monitor::decode(document)?;
    let mut subscriber = store.get_or_create_subscriber(subscriber_id).await?;
    let len = subscriber.monitors.len();
    let slot = subscriber
        .monitors
        .get_mut(position)
        .ok_or(SubscriptionError::PositionOutOfRange { position, len })?;
    *slot = monitor.encode();
    store.save_subscriber(&subscriber).await?;
    info!(subscriber_id, position, "Monitor edited.");
    Ok(render_monitor_list(&subscriber.monitors))
}

/// Removes the monitor at `position` and purges the state stored for that position.
///
/// Trailing monitors move up one position but their state records do not move
/// with them.
pub async fn remove_monitor(
    store: &dyn MonitorStore,
    subscriber_id: SubscriberId,
    position: usize,
) -> Result<String, SubscriptionError> {
    let mut subscriber = store.get_or_create_subscriber(subscriber_id).await?;
    let len = subscriber.monitors.len();
    if position >= len {
        return Err(SubscriptionError::PositionOutOfRange { position, len });
    }
    subscriber.monitors.remove(position);
    store.save_subscriber(&subscriber).await?;
    store.delete_monitor_state(subscriber_id, position).await?;
    info!(subscriber_id, position, "Monitor removed.");
    Ok(render_monitor_list(&subscriber.monitors))
}

/// Drops the whole monitor list together with every state record of the subscriber.
pub async fn clear_monitors(
    store: &dyn MonitorStore,
    subscriber_id: SubscriberId,
) -> Result<String, SubscriptionError> {
    let mut subscriber = store.get_or_create_subscriber(subscriber_id).await?;
    subscriber.monitors.clear();
    store.save_subscriber(&subscriber).await?;
    store.delete_monitor_states(subscriber_id).await?;
    info!(subscriber_id, "Monitor list cleared.");
    Ok(render_monitor_list(&subscriber.monitors))
}

pub async fn list_monitors(
    store: &dyn MonitorStore,
    subscriber_id: SubscriberId,
) -> Result<String, SubscriptionError> {
    let subscriber = store.get_or_create_subscriber(subscriber_id).await?;
    Ok(render_monitor_list(&subscriber.monitors))
}

/// `Active monitorings:` followed by `<i> — <document>` per monitor, each
/// document pretty-printed with sorted keys.
pub fn render_monitor_list(monitors: &[Value]) -> String {
    let lines: Vec<String> = monitors
        .iter()
        .enumerate()
        .map(|(i, monitor)| {
            let pretty = serde_json::to_string_pretty(monitor).unwrap_or_else(|_| monitor.to_string());
            format!("{i} — {pretty}")
        })
        .collect();
    format!("Active monitorings:\n{}", lines.join("\n"))
}
