//! Error taxonomy for turn processing
//!
//! Transport and protocol failures bubble to the caller. Cancellation is a
//! distinguished, benign signal: callers check `is_cancelled()` and never
//! render it as a failure. Malformed frames never reach this type, the
//! decoder drops them.

use thiserror::Error;

/// Errors produced while composing, sending or consuming a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The backend answered with a non-success status.
    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The connection failed or broke mid-stream.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend sent an explicit `error` record.
    #[error("{0}")]
    Protocol(String),

    /// The turn was cancelled by the caller, or blocked while a
    /// human-in-the-loop answer is outstanding.
    #[error("Turn cancelled")]
    Cancelled,

    #[error("Failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TurnError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TurnError::Cancelled)
    }

    /// Build a transport error from a status code and an optional response body.
    ///
    /// Prefers the backend's own `error` / `message` field, then the raw body,
    /// then the canonical reason phrase of the status.
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let body = body.trim();
        let from_json = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| {
                json.get("error")
                    .and_then(|e| {
                        e.as_str()
                            .map(str::to_string)
                            .or_else(|| e.get("message").and_then(|m| m.as_str()).map(str::to_string))
                    })
                    .or_else(|| json.get("message").and_then(|m| m.as_str()).map(str::to_string))
            });

        let message = match from_json {
            Some(message) if !message.is_empty() => message,
            _ if !body.is_empty() && !body.starts_with('{') => body.to_string(),
            _ => status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        };

        TurnError::Transport {
            status: Some(status.as_u16()),
            message,
        }
    }
}

pub type TurnResult<T> = std::result::Result<T, TurnError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_transport_error_prefers_json_error_field() {
        let err = TurnError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"error": "Agent not found"}"#,
        );
        assert_eq!(err.to_string(), "Transport error: Agent not found");
        assert!(matches!(err, TurnError::Transport { status: Some(400), .. }));
    }

    #[test]
    fn test_transport_error_reads_nested_message() {
        let err = TurnError::from_response(
            StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "Token expired"}}"#,
        );
        assert!(err.to_string().contains("Token expired"));
    }

    #[test]
    fn test_transport_error_falls_back_to_status_text() {
        let err = TurnError::from_response(StatusCode::BAD_GATEWAY, "");
        assert!(err.to_string().contains("Bad Gateway"));

        let err = TurnError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "{}");
        assert!(err.to_string().contains("Internal Server Error"));
    }

    #[test]
    fn test_plain_text_body_is_used_verbatim() {
        let err = TurnError::from_response(StatusCode::SERVICE_UNAVAILABLE, "maintenance\n");
        assert!(err.to_string().ends_with("maintenance"));
    }

    #[test]
    fn test_cancelled_is_benign() {
        assert!(TurnError::Cancelled.is_cancelled());
        assert!(!TurnError::Protocol("boom".into()).is_cancelled());
    }
}
