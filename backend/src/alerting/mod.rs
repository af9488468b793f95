pub mod evaluation_service;
pub mod failure_tracker;
