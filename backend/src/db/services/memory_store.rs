//! Process-local `MonitorStore`, used for development runs and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{MonitorStore, StoreError};
use crate::db::models::{MonitorState, Subscriber, SubscriberId};

#[derive(Default)]
pub struct MemoryStore {
    subscribers: DashMap<SubscriberId, Subscriber>,
    states: DashMap<(SubscriberId, usize), MonitorState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peeks at a state record without creating it.
    pub fn monitor_state(&self, subscriber_id: SubscriberId, position: usize) -> Option<MonitorState> {
        self.states
            .get(&(subscriber_id, position))
            .map(|entry| entry.value().clone())
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn list_subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        let mut subscribers: Vec<Subscriber> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        subscribers.sort_by_key(|s| s.id);
        Ok(subscribers)
    }

    async fn get_or_create_subscriber(&self, id: SubscriberId) -> Result<Subscriber, StoreError> {
        Ok(self
            .subscribers
            .entry(id)
            .or_insert_with(|| Subscriber::new(id))
            .value()
            .clone())
    }

    async fn save_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        self.subscribers.insert(subscriber.id, subscriber.clone());
        Ok(())
    }

    async fn get_or_create_monitor_state(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
    ) -> Result<MonitorState, StoreError> {
        Ok(self
            .states
            .entry((subscriber_id, position))
            .or_insert_with(|| MonitorState::new(subscriber_id, position))
            .value()
            .clone())
    }

    async fn save_monitor_state(&self, state: &MonitorState) -> Result<(), StoreError> {
        self.states
            .insert((state.subscriber_id, state.position), state.clone());
        Ok(())
    }

    async fn delete_monitor_states(&self, subscriber_id: SubscriberId) -> Result<(), StoreError> {
        self.states.retain(|(owner, _), _| *owner != subscriber_id);
        Ok(())
    }

    async fn delete_monitor_state(
        &self,
        subscriber_id: SubscriberId,
        position: usize,
    ) -> Result<(), StoreError> {
        self.states.remove(&(subscriber_id, position));
        Ok(())
    }
}
