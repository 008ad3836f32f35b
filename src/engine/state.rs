//! Retry/rotation state machine
//!
//! Pure functions only: classification of a transport result and the
//! transition from one attempt to the next. The executor threads a
//! [`RetryState`] value through its loop instead of mutating counters.

use crate::error::Result;
use crate::models::FailureReason;
use crate::proxy::TransportResponse;

/// HTTP status the backend uses for success
pub const STATUS_OK: u16 = 200;
/// HTTP status treated as backend/proxy overload
pub const STATUS_OVERLOADED: u16 = 503;

/// Position of one payload's executor: attempts made and ring cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryState {
    pub attempt: u32,
    pub cursor: usize,
}

/// What a single transport result means for the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// 200 with the body to keep
    Success(String),
    /// Worth another attempt through the next proxy
    Retry(RetryCause),
    /// A status that retrying cannot fix
    Fatal { status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
    Overloaded,
    Transport(String),
}

impl std::fmt::Display for RetryCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryCause::Overloaded => write!(f, "service unavailable ({})", STATUS_OVERLOADED),
            RetryCause::Transport(error) => f.write_str(error),
        }
    }
}

/// Result of folding a verdict into the state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Succeed { body: String, attempts: u32 },
    Retry { next: RetryState, cause: RetryCause },
    Fail { reason: FailureReason, attempts: u32 },
}

/// Classify a transport result into success, retryable or fatal
pub fn classify(result: Result<TransportResponse>) -> Verdict {
    match result {
        Ok(response) if response.status == STATUS_OK => Verdict::Success(response.body),
        Ok(response) if response.status == STATUS_OVERLOADED => {
            Verdict::Retry(RetryCause::Overloaded)
        }
        Ok(response) => Verdict::Fatal {
            status: response.status,
        },
        Err(e) => Verdict::Retry(RetryCause::Transport(e.to_string())),
    }
}

impl RetryState {
    /// Fresh state whose first attempt uses ring position `offset`
    pub fn starting_at(offset: usize) -> Self {
        Self {
            attempt: 0,
            cursor: offset,
        }
    }

    /// The state after one more attempt through the next proxy
    pub fn advance(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            cursor: self.cursor.wrapping_add(1),
        }
    }

    /// Fold the verdict of the current attempt into the next step
    pub fn transition(self, verdict: Verdict, max_retries: u32) -> Step {
        let attempts = self.attempt + 1;
        match verdict {
            Verdict::Success(body) => Step::Succeed { body, attempts },
            Verdict::Fatal { status } => Step::Fail {
                reason: FailureReason::UnexpectedStatus { status },
                attempts,
            },
            Verdict::Retry(cause) => {
                let next = self.advance();
                if next.attempt < max_retries {
                    Step::Retry { next, cause }
                } else {
                    Step::Fail {
                        reason: FailureReason::RetriesExhausted,
                        attempts,
                    }
                }
            }
        }
    }
}
