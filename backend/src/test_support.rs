//! Shared doubles for unit tests.

use std::net::SocketAddr;
use std::sync::Mutex;

use axum::Router;

use crate::db::models::SubscriberId;
use crate::notifications::{Notifier, ParseMode};

/// Serves `router` on an ephemeral local port for the rest of the test.
pub async fn spawn_stub(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address nothing is listening on.
pub fn unused_local_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub subscriber_id: SubscriberId,
    pub text: String,
    pub parse_mode: ParseMode,
}

/// Keeps every message instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send_message(&self, subscriber_id: SubscriberId, text: String, parse_mode: ParseMode) {
        self.sent.lock().unwrap().push(SentMessage {
            subscriber_id,
            text,
            parse_mode,
        });
    }
}
