/// Result of a single check, as fed to the failure tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Success,
    Failure(CheckFailure),
}

impl CheckOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CheckOutcome::Success)
    }
}

/// Ways a check can fail. Each is terminal for the check that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    /// The request did not finish within the monitor's timeout.
    Timeout,
    /// The server answered with a non-success status code.
    BadStatus(u16),
    /// The body did not match the configured expected response exactly.
    UnexpectedResponse { expected: String, actual: String },
    /// Anything else: connection refused, DNS, invalid URL, undecodable body.
    Other(String),
}

impl CheckFailure {
    /// Short machine-friendly label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckFailure::Timeout => "timeout",
            CheckFailure::BadStatus(_) => "bad_status",
            CheckFailure::UnexpectedResponse { .. } => "unexpected_response",
            CheckFailure::Other(_) => "other",
        }
    }
}
