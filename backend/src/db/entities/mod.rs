//! SeaORM entities for the subscriber and monitor state tables.

pub mod monitor_state;
pub mod subscriber;
