//! The background loop that checks every monitor of every subscriber.

use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::db::models::{Subscriber, SubscriberId};
use crate::db::services::{MonitorStore, StoreError};
use crate::monitors::{CheckOutcome, DecodeError, Monitor, MonitorExecutor};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Why one monitor could not be evaluated. Never escapes its monitor.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Invalid monitor document: {0}")]
    Decode(#[from] DecodeError),
    #[error("Failed to record check result: {0}")]
    Store(#[from] StoreError),
    #[error("Check panicked: {0}")]
    Panicked(String),
}

/// Tally of one pass over all subscribers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub subscribers: usize,
    pub checks: usize,
    pub failures: usize,
    pub errors: usize,
}

pub struct EvaluationService {
    store: Arc<dyn MonitorStore>,
    executor: MonitorExecutor,
    interval: Duration,
}

impl EvaluationService {
    pub fn new(store: Arc<dyn MonitorStore>, executor: MonitorExecutor, interval: Duration) -> Self {
        Self {
            store,
            executor,
            interval,
        }
    }

    /// Spawns the loop as the single background scheduling task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.start_periodic_evaluation())
    }

    /// Runs evaluation cycles forever, sleeping `interval` after each full pass.
    ///
    /// A cycle that cannot even list subscribers is logged and retried on the
    /// next tick, without backoff.
    pub async fn start_periodic_evaluation(self: Arc<Self>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Monitor evaluation service started."
        );
        loop {
            match self.run_evaluation_cycle().await {
                Ok(report) => debug!(
                    subscribers = report.subscribers,
                    checks = report.checks,
                    failures = report.failures,
                    errors = report.errors,
                    "Evaluation cycle finished."
                ),
                Err(e) => error!(error = %e, "Failed to load subscribers; retrying next cycle."),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One sequential pass over every monitor of every subscriber.
    pub async fn run_evaluation_cycle(&self) -> Result<CycleReport, StoreError> {
        let subscribers = self.store.list_subscribers().await?;
        let mut report = CycleReport {
            subscribers: subscribers.len(),
            ..CycleReport::default()
        };
        for subscriber in &subscribers {
            self.evaluate_subscriber(subscriber, &mut report).await;
        }
        Ok(report)
    }

    async fn evaluate_subscriber(&self, subscriber: &Subscriber, report: &mut CycleReport) {
        info!(
            subscriber_id = subscriber.id,
            monitors = subscriber.monitors.len(),
            "Evaluating subscriber monitors."
        );
        for (position, document) in subscriber.monitors.iter().enumerate() {
            match self.evaluate_monitor(subscriber.id, position, document).await {
                Ok(outcome) => {
                    report.checks += 1;
                    if !outcome.is_success() {
                        report.failures += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    error!(
                        subscriber_id = subscriber.id,
                        position,
                        error = %e,
                        "Skipping monitor."
                    );
                }
            }
        }
    }

    async fn evaluate_monitor(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
        document: &Value,
    ) -> Result<CheckOutcome, EvaluationError> {
        let monitor = Monitor::decode(document)?;
        let check = self.executor.check(subscriber_id, position, &monitor);
        match AssertUnwindSafe(check).catch_unwind().await {
            Ok(result) => Ok(result?),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(EvaluationError::Panicked(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::failure_tracker::{FailureTracker, SuppressionPolicy};
    use crate::db::models::MonitorState;
    use crate::db::services::MemoryStore;
    use crate::test_support::{RecordingNotifier, spawn_stub};
    use async_trait::async_trait;
    use axum::{Router, extract::State, routing::get};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store with switchable outages.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        listing_down: bool,
        broken_subscriber: Option<SubscriberId>,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl MonitorStore for FlakyStore {
        async fn list_subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.listing_down {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.list_subscribers().await
        }

        async fn get_or_create_subscriber(&self, id: SubscriberId) -> Result<Subscriber, StoreError> {
            self.inner.get_or_create_subscriber(id).await
        }

        async fn save_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
            self.inner.save_subscriber(subscriber).await
        }

        async fn get_or_create_monitor_state(
            &self,
            subscriber_id: SubscriberId,
            position: usize,
        ) -> Result<MonitorState, StoreError> {
            if self.broken_subscriber == Some(subscriber_id) {
                return Err(StoreError::Unavailable("state table locked".to_string()));
            }
            self.inner.get_or_create_monitor_state(subscriber_id, position).await
        }

        async fn save_monitor_state(&self, state: &MonitorState) -> Result<(), StoreError> {
            self.inner.save_monitor_state(state).await
        }

        async fn delete_monitor_states(&self, subscriber_id: SubscriberId) -> Result<(), StoreError> {
            self.inner.delete_monitor_states(subscriber_id).await
        }

        async fn delete_monitor_state(
            &self,
            subscriber_id: SubscriberId,
            position: usize,
        ) -> Result<(), StoreError> {
            self.inner.delete_monitor_state(subscriber_id, position).await
        }
    }

    fn service(
        store: Arc<dyn MonitorStore>,
        notifier: Arc<RecordingNotifier>,
        interval: Duration,
    ) -> EvaluationService {
        let tracker = FailureTracker::new(store.clone(), notifier, SuppressionPolicy::default());
        let client = MonitorExecutor::build_client(Duration::from_secs(5)).unwrap();
        EvaluationService::new(store, MonitorExecutor::new(client, tracker), interval)
    }

    async fn add_subscriber(store: &dyn MonitorStore, id: SubscriberId, monitors: Vec<Value>) {
        let mut subscriber = store.get_or_create_subscriber(id).await.unwrap();
        subscriber.monitors = monitors;
        store.save_subscriber(&subscriber).await.unwrap();
    }

    fn ping(url: String) -> Value {
        json!({
            "__class__": "HttpMonitor",
            "name": "Ping",
            "endpoint": url,
            "timeout": 2,
            "expected_response": "OK"
        })
    }

    type Reply = Arc<Mutex<&'static str>>;

    async fn switchable_server() -> (String, Reply) {
        let reply: Reply = Arc::new(Mutex::new("OK"));
        let router = Router::new()
            .route(
                "/health",
                get(|State(reply): State<Reply>| async move {
                    let body = *reply.lock().unwrap();
                    body
                }),
            )
            .with_state(reply.clone());
        let addr = spawn_stub(router).await;
        (format!("http://{addr}/health"), reply)
    }

    #[tokio::test]
    async fn test_end_to_end_ping_monitor() {
        let (url, reply) = switchable_server().await;
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = service(store.clone(), notifier.clone(), DEFAULT_CHECK_INTERVAL);
        add_subscriber(store.as_ref(), 77, vec![ping(url.clone())]).await;

        for _ in 0..5 {
            let report = service.run_evaluation_cycle().await.unwrap();
            assert_eq!(report.checks, 1);
            assert_eq!(report.failures, 0);
        }
        assert!(notifier.sent().is_empty());
        assert_eq!(store.monitor_state(77, 0).unwrap().streak, 0);

        *reply.lock().unwrap() = "FAIL";
        for _ in 0..5 {
            service.run_evaluation_cycle().await.unwrap();
        }

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subscriber_id, 77);
        for needle in ["Ping", url.as_str(), "Expected = OK", "Actual = FAIL"] {
            assert!(sent[0].text.contains(needle), "missing {needle:?} in {}", sent[0].text);
        }
        assert_eq!(store.monitor_state(77, 0).unwrap().streak, 5);
    }

    #[tokio::test]
    async fn test_bad_document_does_not_block_other_monitors() {
        let (url, _reply) = switchable_server().await;
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = service(store.clone(), notifier, DEFAULT_CHECK_INTERVAL);
        add_subscriber(
            store.as_ref(),
            1,
            vec![
                json!({"__class__": "SmtpMonitor", "name": "Mail"}),
                ping(url.clone()),
            ],
        )
        .await;
        add_subscriber(store.as_ref(), 2, vec![ping(url)]).await;

        let report = service.run_evaluation_cycle().await.unwrap();

        assert_eq!(
            report,
            CycleReport {
                subscribers: 2,
                checks: 2,
                failures: 0,
                errors: 1,
            }
        );
        assert!(store.monitor_state(1, 0).is_none());
        assert!(store.monitor_state(1, 1).is_some());
        assert!(store.monitor_state(2, 0).is_some());
    }

    #[tokio::test]
    async fn test_store_error_for_one_subscriber_is_isolated() {
        let (url, _reply) = switchable_server().await;
        let store = Arc::new(FlakyStore {
            broken_subscriber: Some(1),
            ..FlakyStore::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let service = service(store.clone(), notifier, DEFAULT_CHECK_INTERVAL);
        add_subscriber(store.as_ref(), 1, vec![ping(url.clone()), ping(url.clone())]).await;
        add_subscriber(store.as_ref(), 2, vec![ping(url)]).await;

        let report = service.run_evaluation_cycle().await.unwrap();

        assert_eq!(report.errors, 2);
        assert_eq!(report.checks, 1);
        assert!(store.inner.monitor_state(2, 0).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_the_cycle() {
        let store = Arc::new(FlakyStore {
            listing_down: true,
            ..FlakyStore::default()
        });
        let service = service(store, Arc::default(), DEFAULT_CHECK_INTERVAL);

        assert!(matches!(
            service.run_evaluation_cycle().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_loop_keeps_retrying_while_store_is_down() {
        let store = Arc::new(FlakyStore {
            listing_down: true,
            ..FlakyStore::default()
        });
        let service = Arc::new(service(
            store.clone(),
            Arc::default(),
            Duration::from_millis(10),
        ));

        let handle = service.spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!handle.is_finished());
        assert!(store.list_calls.load(Ordering::SeqCst) >= 3);
        handle.abort();
    }
}
