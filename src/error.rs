// Error types shared by every remote operation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error payload returned by the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(default)]
    pub title: String,
    pub status: u16,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ProblemDetails {
    /// Synthesized payload for responses whose body is not a problem document.
    pub fn from_status(status: u16) -> Self {
        let title = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unexpected response")
            .to_string();

        Self {
            title,
            status,
            detail: None,
        }
    }

    /// Parse a non-2xx body, falling back to [`ProblemDetails::from_status`].
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ProblemDetails>(body) {
            Ok(mut problem) => {
                // transport status wins over a missing or bogus payload status
                if problem.status == 0 {
                    problem.status = status;
                }
                if problem.title.is_empty() {
                    problem.title = Self::from_status(status).title;
                }
                problem
            }
            Err(_) => Self::from_status(status),
        }
    }

    /// The most specific human readable message available.
    pub fn message(&self) -> &str {
        self.detail
            .as_deref()
            .filter(|detail| !detail.is_empty())
            .unwrap_or(&self.title)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Session expired, sign in again")]
    SessionExpired,

    #[error("API error: {} - {}", .0.status, .0.message())]
    ApiResponseError(ProblemDetails),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),
}

/// Coarse classification callers use to decide presentation and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Authorization,
    Transport,
    Stream,
    Internal,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NetworkError(_) | ApiError::Timeout(_) => ErrorKind::Transport,
            ApiError::SessionExpired => ErrorKind::Authorization,
            ApiError::ApiResponseError(problem) => match problem.status {
                401 | 403 => ErrorKind::Authorization,
                409 => ErrorKind::Conflict,
                400..=499 => ErrorKind::Validation,
                _ => ErrorKind::Transport,
            },
            ApiError::InvalidSlot(_) => ErrorKind::Validation,
            ApiError::StreamError(_) => ErrorKind::Stream,
            ApiError::DecodeError(_) | ApiError::StorageError(_) => ErrorKind::Internal,
        }
    }

    /// Only transient failures are retried by cache reads.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::NetworkError(_) | ApiError::Timeout(_) => true,
            ApiError::ApiResponseError(problem) => problem.status >= 500,
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::ApiResponseError(problem) => Some(problem.status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::DecodeError(err.to_string())
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::DecodeError(err.to_string())
    }
}
