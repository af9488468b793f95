//! HTTP reachability monitor.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::time::Duration;

use super::outcome::{CheckFailure, CheckOutcome};
use super::{DecodeError, Monitor, MonitorCheck};

/// Requests `endpoint` and optionally compares the body against `expected_response`.
///
/// Every optional field keeps its absence through an encode/decode cycle, and
/// `timeout` keeps its exact JSON number so `2` never turns into `2.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpMonitor {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub method: Option<String>,
    /// Seconds. Fractions are allowed.
    #[serde(default)]
    pub timeout: Option<Number>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub expected_response: Option<String>,
}

impl HttpMonitor {
    pub const TAG: &'static str = "HttpMonitor";

    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            method: None,
            timeout: None,
            data: None,
            expected_response: None,
        }
    }

    pub(super) fn decode_fields(fields: Map<String, Value>) -> Result<Monitor, DecodeError> {
        let monitor: HttpMonitor = serde_json::from_value(Value::Object(fields))?;
        if let Some(timeout) = &monitor.timeout {
            let valid = timeout
                .as_f64()
                .is_some_and(|secs| Duration::try_from_secs_f64(secs).is_ok());
            if !valid {
                return Err(DecodeError::InvalidField {
                    field: "timeout",
                    reason: format!("{timeout} is not a usable number of seconds"),
                });
            }
        }
        Ok(Monitor::Http(monitor))
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .as_ref()
            .and_then(Number::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Explicit method, else POST when a body is configured, else GET.
    fn request_method(&self) -> Result<Method, String> {
        match &self.method {
            Some(method) => Method::from_bytes(method.as_bytes())
                .map_err(|e| format!("Invalid HTTP method {method:?}: {e}")),
            None if self.data.is_some() => Ok(Method::POST),
            None => Ok(Method::GET),
        }
    }
}

fn classify_error(err: reqwest::Error) -> CheckOutcome {
    let failure = if err.is_timeout() {
        CheckFailure::Timeout
    } else if let Some(status) = err.status() {
        CheckFailure::BadStatus(status.as_u16())
    } else {
        CheckFailure::Other(err.to_string())
    };
    CheckOutcome::Failure(failure)
}

#[async_trait]
impl MonitorCheck for HttpMonitor {
    fn tag(&self) -> &'static str {
        Self::TAG
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> &str {
        &self.endpoint
    }

    async fn probe(&self, client: &Client) -> CheckOutcome {
        let method = match self.request_method() {
            Ok(method) => method,
            Err(e) => return CheckOutcome::Failure(CheckFailure::Other(e)),
        };

        let mut request = client.request(method, &self.endpoint);
        if let Some(timeout) = self.timeout_duration() {
            request = request.timeout(timeout);
        }
        if let Some(data) = &self.data {
            request = request
                .header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                )
                .body(data.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return classify_error(e),
        };

        let status = response.status();
        if !status.is_success() {
            return CheckOutcome::Failure(CheckFailure::BadStatus(status.as_u16()));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return classify_error(e),
        };
        let body = match String::from_utf8(body.to_vec()) {
            Ok(body) => body,
            Err(e) => {
                return CheckOutcome::Failure(CheckFailure::Other(format!(
                    "Response body is not valid UTF-8: {e}"
                )));
            }
        };

        match &self.expected_response {
            Some(expected) if *expected != body => {
                CheckOutcome::Failure(CheckFailure::UnexpectedResponse {
                    expected: expected.clone(),
                    actual: body,
                })
            }
            _ => CheckOutcome::Success,
        }
    }

    fn failure_message(&self, failure: &CheckFailure) -> String {
        let name = &self.name;
        let url = &self.endpoint;
        match failure {
            CheckFailure::Timeout => {
                let timeout = self
                    .timeout
                    .as_ref()
                    .map_or_else(|| "unset".to_string(), Number::to_string);
                format!(
                    "{name}: *Timed out* during request to [{url}]({url})\nTimeout = {timeout}s"
                )
            }
            CheckFailure::BadStatus(code) => format!(
                "{name}: *Bad response code* during request to [{url}]({url})\nResponse code = {code}"
            ),
            CheckFailure::UnexpectedResponse { expected, actual } => format!(
                "{name}: *Unexpected response* during request to [{url}]({url})\nExpected = {expected}\nActual = {actual}"
            ),
            CheckFailure::Other(msg) => format!(
                "{name}: *Unknown error* during request to [{url}]({url})\nError message = `{msg}`"
            ),
        }
    }

    fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("name".to_string(), Value::String(self.name.clone()));
        doc.insert("endpoint".to_string(), Value::String(self.endpoint.clone()));
        doc.insert(
            "method".to_string(),
            self.method.clone().map_or(Value::Null, Value::String),
        );
        doc.insert(
            "timeout".to_string(),
            self.timeout.clone().map_or(Value::Null, Value::Number),
        );
        doc.insert(
            "data".to_string(),
            self.data.clone().map_or(Value::Null, Value::String),
        );
        doc.insert(
            "expected_response".to_string(),
            self.expected_response
                .clone()
                .map_or(Value::Null, Value::String),
        );
        doc
    }
}
