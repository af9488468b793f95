//! The `services` module provides the access contract the monitoring core needs
//! from persistence, plus the implementations of that contract.
//!
//! The scheduler, executor and failure tracker only ever see `dyn MonitorStore`.

use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

use crate::db::models::{MonitorState, Subscriber, SubscriberId};

pub mod memory_store;
pub mod postgres_store;
pub mod subscription_service;

pub use memory_store::MemoryStore;
pub use postgres_store::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for subscribers and per-monitor failure state.
///
/// Both `get_or_create_*` operations must be safe under concurrent first access
/// from independent tasks: whoever loses the race simply reads the row the
/// winner created. Writes are last-write-wins.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// All known subscribers, ordered by id.
    async fn list_subscribers(&self) -> Result<Vec<Subscriber>, StoreError>;

    async fn get_or_create_subscriber(&self, id: SubscriberId) -> Result<Subscriber, StoreError>;

    async fn save_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError>;

    async fn get_or_create_monitor_state(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
    ) -> Result<MonitorState, StoreError>;

    async fn save_monitor_state(&self, state: &MonitorState) -> Result<(), StoreError>;

    /// Removes every state record of a subscriber.
    async fn delete_monitor_states(&self, subscriber_id: SubscriberId) -> Result<(), StoreError>;

    /// Removes the state record of a single position. Other positions are untouched.
    async fn delete_monitor_state(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
    ) -> Result<(), StoreError>;
}
