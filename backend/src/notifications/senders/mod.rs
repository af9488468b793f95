use serde::Serialize;
use thiserror::Error;

use crate::db::models::SubscriberId;

pub mod telegram;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Text formatting applied by the messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    Markdown,
}

/// Delivers a message to a subscriber.
///
/// Delivery is fire-and-forget: implementations must return immediately and
/// report their own failures. Callers never learn whether a message arrived.
pub trait Notifier: Send + Sync {
    fn send_message(&self, subscriber_id: SubscriberId, text: String, parse_mode: ParseMode);
}
