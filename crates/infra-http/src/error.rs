//! Transport errors and their mapping onto the engine taxonomy

use infra_core::IntegrationError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Longest response body excerpt carried into converted error messages
const BODY_EXCERPT_LEN: usize = 256;

/// Error types for the HTTP transport
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode request body: {0}")]
    EncodingFailed(#[source] serde_json::Error),

    #[error("HTTP {status_code}: {}", excerpt(.body))]
    Status {
        status_code: u16,
        body: String,
        headers: HeaderMap,
    },

    #[error("Failed to decode response: {error}")]
    DecodingFailed {
        #[source]
        error: serde_json::Error,
        raw_body: String,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Giving up after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        source: Box<HttpError>,
    },
}

pub type Result<T> = std::result::Result<T, HttpError>;

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > BODY_EXCERPT_LEN {
        let cut: String = trimmed.chars().take(BODY_EXCERPT_LEN).collect();
        format!("{}...", cut)
    } else {
        trimmed.to_string()
    }
}

impl HttpError {
    /// Classify a reqwest failure
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout(err.to_string())
        } else if err.is_connect() {
            HttpError::Connection(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidRequest(err.to_string())
        } else {
            HttpError::Transport(err.to_string())
        }
    }

    /// Status ≥ 500, 429 and transport-level failures are retryable.
    ///
    /// A [`HttpError::MaxRetriesExceeded`] reports its cause's classification.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Status { status_code, .. } => *status_code >= 500 || *status_code == 429,
            HttpError::Timeout(_) | HttpError::Connection(_) | HttpError::Transport(_) => true,
            HttpError::MaxRetriesExceeded { source, .. } => source.is_retryable(),
            HttpError::InvalidUrl(_)
            | HttpError::InvalidRequest(_)
            | HttpError::EncodingFailed(_)
            | HttpError::DecodingFailed { .. } => false,
        }
    }

    /// HTTP status of the underlying failure, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpError::Status { status_code, .. } => Some(*status_code),
            HttpError::MaxRetriesExceeded { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Raw response body of the underlying failure, if any
    pub fn body(&self) -> Option<&str> {
        match self {
            HttpError::Status { body, .. } => Some(body),
            HttpError::DecodingFailed { raw_body, .. } => Some(raw_body),
            HttpError::MaxRetriesExceeded { source, .. } => source.body(),
            _ => None,
        }
    }

    /// The innermost error, unwrapping retry exhaustion
    pub fn root(&self) -> &HttpError {
        match self {
            HttpError::MaxRetriesExceeded { source, .. } => source.root(),
            other => other,
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl From<HttpError> for IntegrationError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Status {
                status_code,
                body,
                headers,
            } => {
                let message = excerpt(&body);
                match status_code {
                    401 => IntegrationError::AuthenticationFailed(message),
                    403 => IntegrationError::InsufficientPermissions(message),
                    404 => IntegrationError::ResourceNotFound(message),
                    409 => IntegrationError::ResourceAlreadyExists(message),
                    423 => IntegrationError::ResourceLocked(message),
                    422 => IntegrationError::ValidationFailed(message),
                    429 => IntegrationError::RateLimited {
                        retry_after: retry_after(&headers),
                    },
                    s if s >= 500 => IntegrationError::ServerError { status: s, message },
                    s => IntegrationError::BackendError {
                        code: s.to_string(),
                        message,
                    },
                }
            }
            HttpError::Timeout(msg) => IntegrationError::RequestTimeout(msg),
            HttpError::Connection(msg) | HttpError::Transport(msg) => {
                IntegrationError::NetworkUnavailable(msg)
            }
            HttpError::DecodingFailed { error, raw_body } => IntegrationError::InvalidResponse(
                format!("{} (body: {})", error, excerpt(&raw_body)),
            ),
            HttpError::InvalidUrl(msg) => IntegrationError::InvalidConfiguration(msg),
            HttpError::InvalidRequest(msg) => IntegrationError::Internal(msg),
            HttpError::EncodingFailed(e) => IntegrationError::Internal(e.to_string()),
            HttpError::MaxRetriesExceeded { source, .. } => IntegrationError::from(*source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_core::ErrorKind;

    fn status(code: u16) -> HttpError {
        HttpError::Status {
            status_code: code,
            body: format!("{{\"status\": {}}}", code),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_transport_and_taxonomy_agree() {
        let cases = vec![
            status(400),
            status(401),
            status(403),
            status(404),
            status(409),
            status(422),
            status(429),
            status(500),
            status(503),
            HttpError::Timeout("slow".into()),
            HttpError::Connection("refused".into()),
            HttpError::Transport("reset".into()),
            HttpError::InvalidUrl("nope".into()),
            HttpError::InvalidRequest("bad header".into()),
            HttpError::DecodingFailed {
                error: serde_json::from_str::<u32>("x").unwrap_err(),
                raw_body: "x".into(),
            },
        ];

        for err in cases {
            let transport_says = err.is_retryable();
            let described = err.to_string();
            let converted = IntegrationError::from(err);
            assert_eq!(
                transport_says,
                converted.is_retryable(),
                "disagreement for {} -> {:?}",
                described,
                converted.kind()
            );
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(IntegrationError::from(status(401)).kind(), ErrorKind::AuthenticationFailed);
        assert_eq!(IntegrationError::from(status(403)).kind(), ErrorKind::InsufficientPermissions);
        assert_eq!(IntegrationError::from(status(404)).kind(), ErrorKind::ResourceNotFound);
        assert_eq!(IntegrationError::from(status(502)).kind(), ErrorKind::ServerError);
        assert_eq!(IntegrationError::from(status(418)).kind(), ErrorKind::BackendError);
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        let err = HttpError::Status {
            status_code: 429,
            body: String::new(),
            headers,
        };
        match IntegrationError::from(err) {
            IntegrationError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_max_retries_maps_to_cause() {
        let err = HttpError::MaxRetriesExceeded {
            attempts: 3,
            source: Box::new(status(503)),
        };
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), Some(503));
        assert!(matches!(err.root(), HttpError::Status { status_code: 503, .. }));
        assert_eq!(IntegrationError::from(err).kind(), ErrorKind::ServerError);
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let err = HttpError::Status {
            status_code: 500,
            body: "x".repeat(1000),
            headers: HeaderMap::new(),
        };
        assert!(err.to_string().len() < 300);
    }
}
