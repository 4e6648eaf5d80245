use std::path::PathBuf;

use thiserror::Error;

use crate::auth::AuthError;

/// How the retry loop should treat a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient: network, timeout, 5xx, 429 rate limit, 401 after the token
    /// was invalidated.
    Retryable,
    /// Permanent for this item: other 4xx, malformed data, per-item rejection.
    Terminal,
    /// The service's per-day request quota is used up.
    QuotaExhausted,
    /// No usable credentials.
    Auth,
}

/// Typed errors of the Library API enabling retry classification.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Daily API quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Rejected by the service: {0}")]
    Rejected(String),

    #[error("Unexpected response: {0}")]
    Malformed(String),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ApiError {
    /// Build an error from a non-success HTTP response.
    ///
    /// A 429 whose message names the per-day limit is quota exhaustion, not
    /// rate limiting: retrying cannot succeed before the quota day ends.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = extract_error_message(body);
        if status == 429 && names_daily_limit(&message) {
            return ApiError::QuotaExhausted(message);
        }
        ApiError::Http { status, message }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ApiError::Network(_) => FailureClass::Retryable,
            ApiError::Http { status, .. } => {
                if *status == 429 || *status == 401 || *status >= 500 {
                    FailureClass::Retryable
                } else {
                    FailureClass::Terminal
                }
            }
            ApiError::QuotaExhausted(_) => FailureClass::QuotaExhausted,
            ApiError::Auth(_) => FailureClass::Auth,
            ApiError::Rejected(_) | ApiError::Malformed(_) | ApiError::Io { .. } => {
                FailureClass::Terminal
            }
        }
    }

    /// False when the call failed before any request was sent (no token,
    /// unreadable file), so no quota was spent.
    pub fn reached_remote(&self) -> bool {
        !matches!(self, ApiError::Auth(_) | ApiError::Io { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Malformed(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

fn names_daily_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("per day") || lower.contains("perday") || lower.contains("daily")
}

/// Google error bodies look like `{"error": {"code": 429, "message": "..."}}`;
/// fall back to the raw text for anything else.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            message: "x".into(),
        }
    }

    #[test]
    fn test_rate_limit_and_server_errors_retryable() {
        for status in [429, 500, 502, 503] {
            assert_eq!(http(status).class(), FailureClass::Retryable, "{status}");
        }
    }

    #[test]
    fn test_unauthorized_retryable() {
        assert_eq!(http(401).class(), FailureClass::Retryable);
    }

    #[test]
    fn test_client_errors_terminal() {
        for status in [400, 403, 404, 413] {
            assert_eq!(http(status).class(), FailureClass::Terminal, "{status}");
        }
    }

    #[test]
    fn test_network_retryable() {
        assert_eq!(ApiError::Network("connection reset".into()).class(), FailureClass::Retryable);
    }

    #[test]
    fn test_rejected_and_io_terminal() {
        assert_eq!(
            ApiError::Rejected("invalid media".into()).class(),
            FailureClass::Terminal
        );
        let io = ApiError::Io {
            path: PathBuf::from("/x.jpg"),
            source: std::io::Error::other("gone"),
        };
        assert_eq!(io.class(), FailureClass::Terminal);
    }

    #[test]
    fn test_auth_class() {
        let e = ApiError::from(AuthError::MissingToken(PathBuf::from("/t.json")));
        assert_eq!(e.class(), FailureClass::Auth);
        assert!(!e.reached_remote());
        assert!(http(500).reached_remote());
    }

    #[test]
    fn test_429_per_day_is_quota_exhausted() {
        let body = r#"{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED",
            "message": "Quota exceeded for quota metric 'All requests' and limit 'All requests per day' of service 'photoslibrary.googleapis.com'"}}"#;
        let e = ApiError::from_response(429, body);
        assert!(matches!(e, ApiError::QuotaExhausted(ref m) if m.contains("per day")));
        assert_eq!(e.class(), FailureClass::QuotaExhausted);
    }

    #[test]
    fn test_429_per_minute_is_rate_limit() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded for 'Write requests per minute per user'"}}"#;
        let e = ApiError::from_response(429, body);
        assert!(matches!(e, ApiError::Http { status: 429, .. }));
        assert_eq!(e.class(), FailureClass::Retryable);
    }

    #[test]
    fn test_plain_text_body_kept() {
        match ApiError::from_response(500, "  backend error \n") {
            ApiError::Http { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "backend error");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
