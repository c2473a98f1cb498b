//! Error types for the Snyk client.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Snyk operations.
pub type SnykResult<T> = Result<T, SnykError>;

/// Error kinds for categorizing Snyk errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnykErrorKind {
    // Configuration errors
    /// Missing authentication configuration.
    MissingAuth,
    /// Invalid base URL.
    InvalidBaseUrl,
    /// Invalid configuration.
    InvalidConfiguration,
    /// Group auto-discovery found zero or several candidate groups.
    AmbiguousGroup,

    // Transport errors
    /// Bad request (400).
    BadRequest,
    /// Unauthorized (401).
    Unauthorized,
    /// Forbidden (403).
    Forbidden,
    /// Resource not found (404).
    NotFound,
    /// Resource conflict (409).
    Conflict,
    /// Unprocessable entity (422).
    UnprocessableEntity,
    /// Too many requests (429) after retries were exhausted.
    RateLimited,
    /// Internal server error (500).
    InternalError,
    /// Bad gateway (502).
    BadGateway,
    /// Service unavailable (503).
    ServiceUnavailable,
    /// Gateway timeout (504).
    GatewayTimeout,
    /// Any other non-2xx status.
    HttpStatus,
    /// Connection failed.
    ConnectionFailed,
    /// Request timeout.
    Timeout,

    // Payload errors
    /// An entity payload failed validation during construction.
    InvalidPayload,
    /// Failed to deserialize response.
    DeserializationError,
    /// Invalid parameter.
    InvalidParameter,

    // Dispatcher errors
    /// A dispatched task panicked or was cancelled.
    TaskFailed,
    /// The dispatcher was already closed.
    DispatcherClosed,
}

impl fmt::Display for SnykErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAuth => write!(f, "missing_auth"),
            Self::InvalidBaseUrl => write!(f, "invalid_base_url"),
            Self::InvalidConfiguration => write!(f, "invalid_configuration"),
            Self::AmbiguousGroup => write!(f, "ambiguous_group"),
            Self::BadRequest => write!(f, "bad_request"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::UnprocessableEntity => write!(f, "unprocessable_entity"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::InternalError => write!(f, "internal_error"),
            Self::BadGateway => write!(f, "bad_gateway"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::GatewayTimeout => write!(f, "gateway_timeout"),
            Self::HttpStatus => write!(f, "http_status"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidPayload => write!(f, "invalid_payload"),
            Self::DeserializationError => write!(f, "deserialization_error"),
            Self::InvalidParameter => write!(f, "invalid_parameter"),
            Self::TaskFailed => write!(f, "task_failed"),
            Self::DispatcherClosed => write!(f, "dispatcher_closed"),
        }
    }
}

/// Snyk API error with detailed information.
#[derive(Error, Debug)]
pub struct SnykError {
    /// Error kind.
    kind: SnykErrorKind,
    /// Error message.
    message: String,
    /// HTTP status code.
    status_code: Option<u16>,
    /// Raw response body, if the server sent one.
    body: Option<String>,
    /// Parsed Retry-After value.
    retry_after: Option<Duration>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for SnykError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.status_code {
            write!(f, " (HTTP {})", code)?;
        }
        Ok(())
    }
}

impl SnykError {
    /// Creates a new Snyk error.
    pub fn new(kind: SnykErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            body: None,
            retry_after: None,
            cause: None,
        }
    }

    /// Sets the HTTP status code.
    pub fn with_status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the response body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the Retry-After duration.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Gets the error kind.
    pub fn kind(&self) -> &SnykErrorKind {
        &self.kind
    }

    /// Gets the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the HTTP status code.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Gets the response body.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Gets the Retry-After duration sent with a 429.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Returns true for errors produced by the HTTP layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            SnykErrorKind::BadRequest
                | SnykErrorKind::Unauthorized
                | SnykErrorKind::Forbidden
                | SnykErrorKind::NotFound
                | SnykErrorKind::Conflict
                | SnykErrorKind::UnprocessableEntity
                | SnykErrorKind::RateLimited
                | SnykErrorKind::InternalError
                | SnykErrorKind::BadGateway
                | SnykErrorKind::ServiceUnavailable
                | SnykErrorKind::GatewayTimeout
                | SnykErrorKind::HttpStatus
                | SnykErrorKind::ConnectionFailed
                | SnykErrorKind::Timeout
        )
    }

    /// Returns true for errors that require the caller to fix its setup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            SnykErrorKind::MissingAuth
                | SnykErrorKind::InvalidBaseUrl
                | SnykErrorKind::InvalidConfiguration
                | SnykErrorKind::AmbiguousGroup
        )
    }

    /// Returns true if a network-level failure without a status code occurred.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.kind,
            SnykErrorKind::ConnectionFailed | SnykErrorKind::Timeout
        )
    }

    /// Creates an error from a non-2xx HTTP status and its body.
    pub fn from_response(status: u16, body: impl Into<String>) -> Self {
        let kind = Self::kind_from_status(status);
        Self::new(kind, format!("HTTP {} error", status))
            .with_status(status)
            .with_body(body)
    }

    /// Maps HTTP status code to error kind.
    fn kind_from_status(status: u16) -> SnykErrorKind {
        match status {
            400 => SnykErrorKind::BadRequest,
            401 => SnykErrorKind::Unauthorized,
            403 => SnykErrorKind::Forbidden,
            404 => SnykErrorKind::NotFound,
            409 => SnykErrorKind::Conflict,
            422 => SnykErrorKind::UnprocessableEntity,
            429 => SnykErrorKind::RateLimited,
            500 => SnykErrorKind::InternalError,
            502 => SnykErrorKind::BadGateway,
            503 => SnykErrorKind::ServiceUnavailable,
            504 => SnykErrorKind::GatewayTimeout,
            _ => SnykErrorKind::HttpStatus,
        }
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SnykErrorKind::InvalidConfiguration, message)
    }

    /// Creates a payload validation error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(SnykErrorKind::InvalidPayload, message)
    }

    /// Creates a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(SnykErrorKind::DeserializationError, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SnykErrorKind::Timeout, message)
    }
}
