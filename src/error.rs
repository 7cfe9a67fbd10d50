use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the API access layer.
///
/// Nothing here is retried internally; `is_retriable` is only a hint for the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller cancelled the operation. Never shown to the user.
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("GitHub returned HTTP {} ({code}): {message}", .status.as_u16())]
    Status {
        status: StatusCode,
        code: &'static str,
        message: String,
        retriable: bool,
    },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("token validation failed: HTTP {} - check that your token is valid", .status.as_u16())]
    InvalidToken { status: StatusCode },

    #[error(
        "missing required token scopes: {}\n\nYour token needs: repo, project (or read:org)\nSee: https://github.com/settings/tokens",
        .missing.join(", ")
    )]
    MissingScopes { missing: Vec<&'static str> },
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            ApiError::Status { retriable, .. } => *retriable,
            ApiError::Transport(_) | ApiError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_scopes_message_lists_only_missing() {
        let err = ApiError::MissingScopes {
            missing: vec!["project or read:org"],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("missing required token scopes: project or read:org\n"));
        assert!(msg.contains("https://github.com/settings/tokens"));
    }

    #[test]
    fn invalid_token_mentions_status() {
        let err = ApiError::InvalidToken {
            status: StatusCode::UNAUTHORIZED,
        };
        assert!(err.to_string().contains("HTTP 401"));
    }

    #[test]
    fn cancellation_is_distinct_from_timeout() {
        assert!(ApiError::Cancelled.is_cancelled());
        assert!(!ApiError::Timeout(Duration::from_secs(1)).is_cancelled());
        assert!(ApiError::Timeout(Duration::from_secs(1)).is_retriable());
    }
}
