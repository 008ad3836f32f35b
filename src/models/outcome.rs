use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a payload ended without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Every allowed attempt hit a transport error or a 503
    RetriesExhausted,
    /// The backend answered with a status that retrying cannot fix
    UnexpectedStatus { status: u16 },
    /// The body arrived but could not be appended to the result sink
    SinkWrite,
    /// The run was asked to stop before this payload finished
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::UnexpectedStatus { .. } => "unexpected_status",
            FailureReason::SinkWrite => "sink_write",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::UnexpectedStatus { status } => {
                write!(f, "{} (status {})", self.as_str(), status)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Terminal failure of one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub reason: FailureReason,
    /// Transport calls made before giving up
    pub attempts: u32,
    pub last_proxy: Option<String>,
    pub last_error: Option<String>,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} after {} attempt(s)", self.reason, self.attempts)?;
        if let Some(proxy) = &self.last_proxy {
            write!(f, ", last proxy {}", proxy)?;
        }
        if let Some(error) = &self.last_error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

/// Terminal value for one payload, produced exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    Success {
        body: String,
        attempts: u32,
        proxy: String,
    },
    Failure(Failure),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RequestOutcome::Success { attempts, .. } => *attempts,
            RequestOutcome::Failure(failure) => failure.attempts,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RequestOutcome::Failure(failure) => Some(failure),
            RequestOutcome::Success { .. } => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            RequestOutcome::Success { body, .. } => Some(body),
            RequestOutcome::Failure(_) => None,
        }
    }
}

/// A single transport call made on behalf of a payload
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub payload: String,
    pub proxy_address: String,
    /// Zero-based attempt number
    pub attempt: u32,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    /// Milliseconds spent in the transport call
    pub response_time: u64,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        self.status_code == Some(200)
    }
}
