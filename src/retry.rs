//! Retry policy for the network-bound service stages (analysis,
//! recommendation search, try-on, video generation). Uploads, favorites
//! and fire-and-forget persistence are single-attempt and never come
//! through here.

use crate::capabilities::http::HttpError;
use crate::{
    ErrorKind, MAX_ATTEMPTS, NETWORK_RETRY_DELAY_MS, RATE_LIMIT_BASE_DELAY_MS,
    SERVER_ERROR_RETRY_DELAY_MS, TIMEOUT_RETRY_DELAY_MS,
};

/// What went wrong with one attempt, reduced to the classes the policy
/// distinguishes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    ServerError,
    Connect,
    Timeout,
    /// Not worth another attempt, whatever the budget says.
    Terminal(ErrorKind),
}

impl FailureClass {
    #[must_use]
    pub fn of_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            408 => Self::Timeout,
            401 | 403 => Self::Terminal(ErrorKind::Config),
            400 | 422 => Self::Terminal(ErrorKind::Validation),
            _ => Self::Terminal(ErrorKind::ServiceUnavailable),
        }
    }

    #[must_use]
    pub fn of_transport(error: &HttpError) -> Self {
        match error {
            HttpError::Timeout { .. } => Self::Timeout,
            HttpError::ConnectionError { .. } | HttpError::DnsError { .. } => Self::Connect,
            HttpError::Cancelled => Self::Terminal(ErrorKind::Cancelled),
            HttpError::InvalidUrl { .. }
            | HttpError::InvalidHeader { .. }
            | HttpError::BodyTooLarge { .. }
            | HttpError::SerializationError { .. } => Self::Terminal(ErrorKind::Config),
            HttpError::InvalidResponse { .. } => Self::Terminal(ErrorKind::Validation),
        }
    }

    /// The error category surfaced if this class exhausts the budget.
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::RateLimited => ErrorKind::RateLimited,
            Self::ServerError => ErrorKind::ServiceUnavailable,
            Self::Connect | Self::Timeout => ErrorKind::Network,
            Self::Terminal(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay_ms: u64 },
    Fail(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Decides what to do after a failed attempt. `attempt` counts the
    /// attempts already made, so the first failure arrives with 1.
    #[must_use]
    pub fn decide(&self, class: FailureClass, attempt: u32) -> RetryDecision {
        let delay_ms = match class {
            FailureClass::Terminal(kind) => return RetryDecision::Fail(kind),
            _ if attempt >= self.max_attempts => return RetryDecision::Fail(class.kind()),
            // 2^attempt seconds: 2s after the first failure, 4s after the second.
            FailureClass::RateLimited => RATE_LIMIT_BASE_DELAY_MS << attempt,
            FailureClass::ServerError => SERVER_ERROR_RETRY_DELAY_MS,
            FailureClass::Connect => NETWORK_RETRY_DELAY_MS,
            FailureClass::Timeout => TIMEOUT_RETRY_DELAY_MS,
        };

        RetryDecision::Retry { delay_ms }
    }
}
