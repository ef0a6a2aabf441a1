//! Normalized publish errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crosspost_model::{ErrorCode, LastError, Platform};

/// A publish failure, normalized to `{message, code}`.
///
/// The code carries the retry classification (see
/// [`ErrorCode::is_retryable`]); there is no separate code path for
/// permanent failures.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct PublishError {
    pub code: ErrorCode,
    pub message: String,
}

impl PublishError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn needs_reconnection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NeedsReconnection, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Rejected, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn unsupported(platform: Platform) -> Self {
        Self::new(ErrorCode::Rejected, format!("unsupported platform: {platform}"))
    }

    /// Map an HTTP status from a platform API to the error taxonomy.
    ///
    /// 401/403 mean the credential is invalid or revoked and the account
    /// must be reconnected; 429 is throttling; 5xx is transient; any other
    /// 4xx is a permanent rejection of the content.
    pub fn from_status(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        let code = match status.as_u16() {
            401 | 403 => ErrorCode::NeedsReconnection,
            429 => ErrorCode::RateLimited,
            500..=599 => ErrorCode::ServerError,
            _ => ErrorCode::Rejected,
        };
        Self::new(code, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Convert into the form persisted on a platform target.
    pub fn into_last_error(self, timestamp: DateTime<Utc>) -> LastError {
        LastError {
            message: self.message,
            code: self.code,
            timestamp,
        }
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::Timeout
        } else {
            ErrorCode::Network
        };
        Self::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (401, ErrorCode::NeedsReconnection),
            (403, ErrorCode::NeedsReconnection),
            (429, ErrorCode::RateLimited),
            (500, ErrorCode::ServerError),
            (503, ErrorCode::ServerError),
            (400, ErrorCode::Rejected),
            (422, ErrorCode::Rejected),
        ];
        for (status, expected) in cases {
            let err = PublishError::from_status(
                reqwest::StatusCode::from_u16(status).unwrap(),
                "nope",
            );
            assert_eq!(err.code, expected, "status {status}");
        }
    }

    #[test]
    fn retryability_follows_code() {
        assert!(!PublishError::needs_reconnection("revoked").is_retryable());
        assert!(!PublishError::rejected("bad content").is_retryable());
        assert!(PublishError::timeout("slow").is_retryable());
        assert!(PublishError::new(ErrorCode::ServerError, "500").is_retryable());
    }
}
