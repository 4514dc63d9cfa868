//! Typed errors for the RFP discovery pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! retryable oracle hiccup from a fatal storage failure.

use thiserror::Error;

/// Top-level error for pipeline operations.
#[derive(Debug, Error)]
pub enum ScoutError {
    /// Malformed input (local, never retried)
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Semantic oracle failed or answered with garbage
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Page fetch failed at the transport level
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Deadline text or listing page could not be parsed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Storage operation failed (fatal to a run)
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Run was cancelled before completion
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl ScoutError {
    /// Wrap any storage backend error.
    pub fn storage(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(e.into())
    }

    /// Storage failures are the only errors that abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Input validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Entity name empty after trimming
    #[error("entity name must not be empty")]
    EmptyName,

    /// Unknown entity kind label
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    /// Unknown entity status label
    #[error("unknown entity status: {0}")]
    UnknownStatus(String),

    /// Unknown listing shape label
    #[error("unknown site shape: {0}")]
    UnknownShape(String),

    /// Referenced parent entity does not exist
    #[error("unknown parent entity: {0}")]
    UnknownParent(String),

    /// No entity with this id
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// URL could not be parsed or is not http(s)
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

/// Errors from the semantic oracle. All of them are retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Call exceeded its time budget
    #[error("oracle timed out")]
    Timeout,

    /// Service unreachable, rate limited, or returned a non-2xx status
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// Response could not be interpreted
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),
}

/// Transport-level fetch errors.
///
/// HTTP statuses are not errors: a 404 is a successfully fetched page
/// whose status the caller classifies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// URL failed to parse
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// URL rejected by the SSRF guard
    #[error("blocked URL {url}: {source}")]
    Blocked {
        url: String,
        #[source]
        source: SecurityError,
    },

    /// Redirect chain too long or looping
    #[error("too many redirects: {url}")]
    TooManyRedirects { url: String },

    /// Request timed out
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Host name did not resolve
    #[error("DNS failure for {url}: {message}")]
    Dns { url: String, message: String },

    /// Connection refused/reset
    #[error("connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    /// Response body could not be read
    #[error("failed reading body of {url}: {message}")]
    Body { url: String, message: String },
}

impl FetchError {
    /// Whether this is a transient network failure worth one retry.
    pub fn is_network_failure(&self) -> bool {
        !matches!(
            self,
            Self::InvalidUrl { .. } | Self::Blocked { .. } | Self::TooManyRedirects { .. }
        )
    }

    /// The URL the failed request targeted.
    pub fn url(&self) -> &str {
        match self {
            Self::InvalidUrl { url }
            | Self::Blocked { url, .. }
            | Self::TooManyRedirects { url }
            | Self::Timeout { url }
            | Self::Dns { url, .. }
            | Self::Connect { url, .. }
            | Self::Body { url, .. } => url,
        }
    }
}

/// Parse failures. Logged and the affected candidate dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No accepted date format matched
    #[error("unparseable deadline: {text:?}")]
    Deadline { text: String },

    /// Listing page structurally broken
    #[error("broken listing page {url}: {reason}")]
    Listing { url: String, reason: String },
}

/// Security-related errors, primarily for SSRF protection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g., file://, ftp://)
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// Host is blocked (e.g., localhost, metadata services)
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// IP in blocked CIDR range (e.g., 10.0.0.0/8)
    #[error("blocked IP range: {0}")]
    BlockedCidr(String),

    /// URL has no host
    #[error("URL has no host")]
    NoHost,

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    UrlParse(String),

    /// DNS lookup failed during validation
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),
}

impl From<url::ParseError> for SecurityError {
    fn from(e: url::ParseError) -> Self {
        Self::UrlParse(e.to_string())
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ScoutError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for oracle operations.
pub type OracleResult<T> = std::result::Result<T, OracleError>;

/// Result type alias for security operations.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;
