//! Domain records shared by the persistence layer and the monitoring core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chat identifier of a subscriber. Telegram chat ids are signed 64-bit.
pub type SubscriberId = i64;

/// State tag given to subscribers created on first contact.
pub const DEFAULT_SUBSCRIBER_STATE: &str = "start";

/// A recipient of notifications together with its ordered monitor list.
///
/// Monitor documents are kept in their encoded form. They are decoded by the
/// scheduler on every pass, so a single broken entry never poisons the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub state: String,
    pub properties: Map<String, Value>,
    pub monitors: Vec<Value>,
}

impl Subscriber {
    pub fn new(id: SubscriberId) -> Self {
        Self {
            id,
            state: DEFAULT_SUBSCRIBER_STATE.to_string(),
            properties: Map::new(),
            monitors: Vec::new(),
        }
    }
}

/// Failure bookkeeping for the monitor at `position` in a subscriber's list.
///
/// Keyed by position only: removing or reordering monitors shifts the meaning
/// of every trailing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    pub subscriber_id: SubscriberId,
    pub position: usize,
    /// Consecutive failed checks. Not capped.
    pub streak: u64,
    /// No notification is sent for this monitor before this instant.
    pub suppressed_until: Option<DateTime<Utc>>,
}

impl MonitorState {
    pub fn new(subscriber_id: SubscriberId, position: usize) -> Self {
        Self {
            subscriber_id,
            position,
            streak: 0,
            suppressed_until: None,
        }
    }
}
