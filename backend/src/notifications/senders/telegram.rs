use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

use super::{Notifier, ParseMode, SenderError};
use crate::db::models::SubscriberId;

/// A sender for pushing notifications via the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramSender {
    client: Client,
    api_url: String,
    bot_token: String,
}

impl TelegramSender {
    pub fn new(api_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }

    /// Posts one message and waits for the API to accept it.
    pub async fn deliver(
        &self,
        chat_id: SubscriberId,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<(), SenderError> {
        let payload = TelegramMessage {
            chat_id,
            text,
            parse_mode,
        };

        let response = self
            .client
            .post(self.send_message_url())
            .json(&payload)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Telegram API returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: SubscriberId,
    text: &'a str,
    parse_mode: ParseMode,
}

impl Notifier for TelegramSender {
    fn send_message(&self, subscriber_id: SubscriberId, text: String, parse_mode: ParseMode) {
        let sender = self.clone();
        tokio::spawn(async move {
            match sender.deliver(subscriber_id, &text, parse_mode).await {
                Ok(()) => debug!(subscriber_id, "Notification delivered."),
                Err(e) => error!(subscriber_id, error = %e, "Failed to deliver notification."),
            }
        });
    }
}
