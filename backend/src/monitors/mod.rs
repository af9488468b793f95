//! Monitor variants and their document codec.
//!
//! Monitors are stored and shown to subscribers as JSON documents carrying a
//! `__class__` tag. Decoding goes through a closed registry of known tags; there
//! is no dynamic lookup, so an unknown tag is rejected before anything runs.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod executor;
pub mod http;
pub mod outcome;

pub use executor::MonitorExecutor;
pub use http::HttpMonitor;
pub use outcome::{CheckFailure, CheckOutcome};

/// Document key holding the variant tag.
pub const CLASS_KEY: &str = "__class__";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Monitor document must be a JSON object")]
    NotAnObject,
    #[error("Monitor document has no string `__class__` tag")]
    MissingTag,
    #[error("Unknown monitor type: {0}")]
    UnknownTag(String),
    #[error("Malformed monitor document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Behaviour every monitor variant provides.
#[async_trait]
pub trait MonitorCheck: Send + Sync {
    /// Tag written to `__class__` when encoding.
    fn tag(&self) -> &'static str;

    /// Display name chosen by the subscriber.
    fn name(&self) -> &str;

    /// What is being checked, for logs.
    fn target(&self) -> &str;

    /// Runs one check. Never fails: every problem is a classified outcome.
    async fn probe(&self, client: &Client) -> CheckOutcome;

    /// Markdown notification text for a failed check.
    fn failure_message(&self, failure: &CheckFailure) -> String;

    /// Every field of the variant, absent ones as `null`, without the tag.
    fn to_document(&self) -> Map<String, Value>;
}

/// The closed set of monitor variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Monitor {
    Http(HttpMonitor),
}

type Decoder = fn(Map<String, Value>) -> Result<Monitor, DecodeError>;

const REGISTRY: &[(&str, Decoder)] = &[(HttpMonitor::TAG, HttpMonitor::decode_fields)];

impl Monitor {
    /// Tags accepted by [`Monitor::decode`].
    pub fn registered_tags() -> impl Iterator<Item = &'static str> {
        REGISTRY.iter().map(|(tag, _)| *tag)
    }

    pub fn decode(document: &Value) -> Result<Self, DecodeError> {
        let Value::Object(fields) = document else {
            return Err(DecodeError::NotAnObject);
        };
        let mut fields = fields.clone();
        let tag = match fields.remove(CLASS_KEY) {
            Some(Value::String(tag)) => tag,
            _ => return Err(DecodeError::MissingTag),
        };
        let decoder = REGISTRY
            .iter()
            .find(|(registered, _)| *registered == tag)
            .map(|(_, decoder)| *decoder)
            .ok_or(DecodeError::UnknownTag(tag))?;
        decoder(fields)
    }

    pub fn encode(&self) -> Value {
        let variant = self.variant();
        let mut doc = variant.to_document();
        doc.insert(CLASS_KEY.to_string(), Value::String(variant.tag().to_string()));
        Value::Object(doc)
    }

    pub fn variant(&self) -> &dyn MonitorCheck {
        match self {
            Monitor::Http(monitor) => monitor,
        }
    }
}

impl From<HttpMonitor> for Monitor {
    fn from(monitor: HttpMonitor) -> Self {
        Monitor::Http(monitor)
    }
}
