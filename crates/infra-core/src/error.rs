//! Error taxonomy shared by the transport, the integrations and the registry
//!
//! Every error carries:
//! - a stable machine code for programmatic handling
//! - a severity so callers can pick auto-retry, prompt, or fatal treatment
//! - a retryable flag, the only input to automatic retry decisions

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How bad an error is from the caller's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Fieldless mirror of [`IntegrationError`] used for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Auth
    AuthenticationFailed,
    TokenExpired,
    InsufficientPermissions,

    // Transient
    NetworkUnavailable,
    RequestTimeout,
    ServerError,
    RateLimited,

    // Contract
    InvalidResponse,

    // Resource state
    ResourceNotFound,
    ResourceAlreadyExists,
    ResourceInInvalidState,
    ResourceLocked,

    // Execution
    ActionNotSupported,
    ActionFailed,
    DependencyNotMet,
    ConcurrentModification,

    // Setup
    InvalidConfiguration,
    MissingRequiredField,
    ConfigurationConflict,

    ValidationFailed,
    UnsupportedOperation,
    QuotaExceeded,

    // Backend specific
    CloudflareError,
    GithubError,
    BackendError,

    IntegrationNotFound,

    Unknown,
    Internal,
}

impl ErrorKind {
    /// Stable machine code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorKind::TokenExpired => "TOKEN_EXPIRED",
            ErrorKind::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorKind::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            ErrorKind::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::ResourceAlreadyExists => "RESOURCE_ALREADY_EXISTS",
            ErrorKind::ResourceInInvalidState => "RESOURCE_IN_INVALID_STATE",
            ErrorKind::ResourceLocked => "RESOURCE_LOCKED",
            ErrorKind::ActionNotSupported => "ACTION_NOT_SUPPORTED",
            ErrorKind::ActionFailed => "ACTION_FAILED",
            ErrorKind::DependencyNotMet => "DEPENDENCY_NOT_MET",
            ErrorKind::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ErrorKind::InvalidConfiguration => "INVALID_CONFIGURATION",
            ErrorKind::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ErrorKind::ConfigurationConflict => "CONFIGURATION_CONFLICT",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::CloudflareError => "CLOUDFLARE_ERROR",
            ErrorKind::GithubError => "GITHUB_ERROR",
            ErrorKind::BackendError => "BACKEND_ERROR",
            ErrorKind::IntegrationNotFound => "INTEGRATION_NOT_FOUND",
            ErrorKind::Unknown => "UNKNOWN",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether the transport may retry this kind automatically
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkUnavailable
                | ErrorKind::RequestTimeout
                | ErrorKind::ServerError
                | ErrorKind::RateLimited
        )
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::AuthenticationFailed
            | ErrorKind::TokenExpired
            | ErrorKind::InsufficientPermissions => Severity::High,

            ErrorKind::NetworkUnavailable | ErrorKind::RequestTimeout | ErrorKind::ServerError => {
                Severity::Medium
            }
            ErrorKind::RateLimited => Severity::Low,

            ErrorKind::InvalidResponse => Severity::High,

            ErrorKind::ResourceNotFound
            | ErrorKind::ResourceAlreadyExists
            | ErrorKind::ResourceInInvalidState
            | ErrorKind::ResourceLocked
            | ErrorKind::IntegrationNotFound => Severity::Medium,

            ErrorKind::ActionNotSupported
            | ErrorKind::ActionFailed
            | ErrorKind::DependencyNotMet
            | ErrorKind::ConcurrentModification => Severity::High,

            ErrorKind::InvalidConfiguration
            | ErrorKind::MissingRequiredField
            | ErrorKind::ConfigurationConflict => Severity::Critical,

            ErrorKind::ValidationFailed | ErrorKind::UnsupportedOperation => Severity::Low,
            ErrorKind::QuotaExceeded => Severity::Medium,

            ErrorKind::CloudflareError | ErrorKind::GithubError | ErrorKind::BackendError => {
                Severity::Medium
            }

            ErrorKind::Unknown | ErrorKind::Internal => Severity::Critical,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for reconciliation operations
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Request timed out: {0}")]
    RequestTimeout(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Rate limited{}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Resource in invalid state: {0}")]
    ResourceInInvalidState(String),

    #[error("Resource locked: {0}")]
    ResourceLocked(String),

    #[error("Action not supported: {0}")]
    ActionNotSupported(String),

    #[error("Action failed: {message}")]
    ActionFailed {
        message: String,
        #[source]
        source: Option<Box<IntegrationError>>,
    },

    #[error("Dependency not met: {0}")]
    DependencyNotMet(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Cloudflare error {code}: {message}")]
    CloudflareError { code: i64, message: String },

    #[error("GitHub error ({status}): {message}")]
    GithubError { status: u16, message: String },

    #[error("Backend error {code}: {message}")]
    BackendError { code: String, message: String },

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {}s", d.as_secs()))
        .unwrap_or_default()
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, IntegrationError>;

impl IntegrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntegrationError::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            IntegrationError::TokenExpired => ErrorKind::TokenExpired,
            IntegrationError::InsufficientPermissions(_) => ErrorKind::InsufficientPermissions,
            IntegrationError::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            IntegrationError::RequestTimeout(_) => ErrorKind::RequestTimeout,
            IntegrationError::ServerError { .. } => ErrorKind::ServerError,
            IntegrationError::RateLimited { .. } => ErrorKind::RateLimited,
            IntegrationError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            IntegrationError::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            IntegrationError::ResourceAlreadyExists(_) => ErrorKind::ResourceAlreadyExists,
            IntegrationError::ResourceInInvalidState(_) => ErrorKind::ResourceInInvalidState,
            IntegrationError::ResourceLocked(_) => ErrorKind::ResourceLocked,
            IntegrationError::ActionNotSupported(_) => ErrorKind::ActionNotSupported,
            IntegrationError::ActionFailed { .. } => ErrorKind::ActionFailed,
            IntegrationError::DependencyNotMet(_) => ErrorKind::DependencyNotMet,
            IntegrationError::ConcurrentModification(_) => ErrorKind::ConcurrentModification,
            IntegrationError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            IntegrationError::MissingRequiredField(_) => ErrorKind::MissingRequiredField,
            IntegrationError::ConfigurationConflict(_) => ErrorKind::ConfigurationConflict,
            IntegrationError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            IntegrationError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            IntegrationError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            IntegrationError::CloudflareError { .. } => ErrorKind::CloudflareError,
            IntegrationError::GithubError { .. } => ErrorKind::GithubError,
            IntegrationError::BackendError { .. } => ErrorKind::BackendError,
            IntegrationError::IntegrationNotFound(_) => ErrorKind::IntegrationNotFound,
            IntegrationError::Unknown(_) => ErrorKind::Unknown,
            IntegrationError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn severity(&self) -> Severity {
        self.kind().severity()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Wrap an underlying error as a failed action
    pub fn action_failed(message: impl Into<String>, source: IntegrationError) -> Self {
        IntegrationError::ActionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        IntegrationError::AuthenticationFailed(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        IntegrationError::ResourceNotFound(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        IntegrationError::UnsupportedOperation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        IntegrationError::Internal(msg.into())
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(err: serde_json::Error) -> Self {
        IntegrationError::InvalidResponse(err.to_string())
    }
}

impl From<anyhow::Error> for IntegrationError {
    fn from(err: anyhow::Error) -> Self {
        IntegrationError::Internal(err.to_string())
    }
}
