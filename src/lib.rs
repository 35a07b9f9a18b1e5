// lib.rs - Shared core for the outfit capture & analysis app

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod event;
pub mod favorites;
pub mod model;
pub mod registry;
pub mod retry;
pub mod services;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use event::Event;
pub use model::{Model, ViewModel};

/// How long the shutter must be held before a capture fires.
pub const CAPTURE_HOLD_MS: u64 = 2000;
/// How long the invalid-photo notice stays up before the session resets.
pub const INVALID_PHOTO_RESET_MS: u64 = 500;

pub const MAX_ATTEMPTS: u32 = 3;
pub const RATE_LIMIT_BASE_DELAY_MS: u64 = 1000;
pub const SERVER_ERROR_RETRY_DELAY_MS: u64 = 2000;
pub const NETWORK_RETRY_DELAY_MS: u64 = 3000;
pub const TIMEOUT_RETRY_DELAY_MS: u64 = 5000;

pub const ANALYZE_TIMEOUT_MS: u64 = 30_000;
pub const SEARCH_TIMEOUT_MS: u64 = 300_000;
pub const TRY_ON_TIMEOUT_MS: u64 = 120_000;
pub const VIDEO_TIMEOUT_MS: u64 = 300_000;
pub const UPLOAD_TIMEOUT_MS: u64 = 120_000;
pub const PERSIST_TIMEOUT_MS: u64 = 30_000;

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 10;
pub const MAX_RECOMMENDATIONS: usize = 5;
pub const MAX_REGENERATIONS: u32 = 1;
pub const MAX_OUTFIT_NAME_LEN: usize = 30;

/// Identifies one capture session. Allocated monotonically; a stale
/// response whose session id no longer matches is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The closed set of failure categories the UI is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Connectivity failures and timeouts.
    Network,
    RateLimited,
    ServiceUnavailable,
    /// Missing or rejected credentials, bad injected configuration.
    Config,
    /// Service responses that do not satisfy the contract. Never coerced.
    Validation,
    InvalidPhoto,
    /// Classification only. Cancellation is silent and never surfaces copy.
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Config => "CONFIG_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::InvalidPhoto => "INVALID_INPUT_PHOTO",
            Self::Cancelled => "CANCELLED",
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimited | Self::ServiceUnavailable
        )
    }

    #[must_use]
    pub const fn http_status_hint(self) -> Option<u16> {
        match self {
            Self::RateLimited => Some(429),
            Self::ServiceUnavailable => Some(503),
            Self::Config => Some(401),
            Self::Validation => Some(400),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
    pub retry_after_ms: Option<u64>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
            retry_after_ms: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::RateLimited => {
                if let Some(retry_after) = self.retry_after_ms {
                    let seconds = retry_after / 1000;
                    format!("Too many requests. Please wait {seconds} seconds and try again.")
                } else {
                    "Too many requests. Please wait a moment and try again.".into()
                }
            }
            ErrorKind::ServiceUnavailable => {
                "The styling service is temporarily unavailable. Please try again shortly.".into()
            }
            ErrorKind::Config => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::InvalidPhoto => {
                "We couldn't find an outfit in that photo. Try again with your full outfit in frame."
                    .into()
            }
            // Never shown; cancellations are dropped before reaching the UI.
            ErrorKind::Cancelled => String::new(),
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Config,
            429 => ErrorKind::RateLimited,
            400 | 422 => ErrorKind::Validation,
            408 => ErrorKind::Network,
            500..=599 => ErrorKind::ServiceUnavailable,
            _ => ErrorKind::ServiceUnavailable,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .map(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

pub type AppResult<T> = Result<T, AppError>;
