pub mod server;

pub mod alerting;
pub mod db;
pub mod monitors;
pub mod notifications;

#[cfg(test)]
pub(crate) mod test_support;
