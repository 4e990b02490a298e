// src/error.rs

//! Unified error handling for the reward cache.
//!
//! `AppError` is the crate-wide error. The fetch and parse layers report
//! their own narrower kinds (`FetchError`, `ParseError`) so the data manager
//! can tell a flaky network apart from an upstream page redesign.

use std::fmt;

use thiserror::Error;

use crate::models::Language;

/// Result type alias for reward cache operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Pattern in a table schema did not compile
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot could not be written, verified or read back
    #[error("Persistence error for {language}: {message}")]
    Persistence { language: String, message: String },

    /// No partition exists for the requested language
    #[error("No data for language {0}")]
    NoDataForLanguage(Language),

    /// The manager is shutting down
    #[error("Shutting down")]
    ShuttingDown,
}

impl AppError {
    /// Create a pattern compilation error.
    pub fn pattern(pattern: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a persistence error for a language partition.
    pub fn persistence(language: &Language, message: impl fmt::Display) -> Self {
        Self::Persistence {
            language: language.to_string(),
            message: message.to_string(),
        }
    }
}

/// Failure kinds of the fetch layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection refused, reset or DNS failure
    #[error("{url} unreachable: {message}")]
    Unreachable { url: String, message: String },

    /// Request exceeded the configured timeout
    #[error("{url} timed out")]
    Timeout { url: String },

    /// Server answered with a non-2xx status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Server answered 2xx with nothing in it
    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    /// No source is configured for the (kind, language) pair
    #[error("no {kind} source configured for {language}")]
    NotConfigured { kind: String, language: String },
}

impl FetchError {
    /// Whether a retry could plausibly succeed.
    ///
    /// 4xx answers are permanent for the current cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::EmptyBody { .. } | Self::NotConfigured { .. } => false,
        }
    }

    /// Whether the failure points at the upstream page rather than the network.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::EmptyBody { .. })
    }
}

/// Failure kinds of the parsing layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No table in the document satisfied the schema's anchor rule
    #[error("no table matching schema '{schema}'")]
    NoMatchingTable { schema: String },

    /// A matching table was found but none of its rows had the required shape
    #[error("all {count} rows of schema '{schema}' are malformed")]
    MalformedRow { schema: String, count: usize },

    /// The parsing backend itself failed
    #[error("{backend} backend failed: {message}")]
    Backend { backend: String, message: String },
}

/// Taxonomy used to report why a source was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient, cache-preserving
    Network,
    /// Upstream format drift, cache-preserving, surfaced prominently
    Schema,
    /// Suspect record-count collapse, refresh rejected
    Validation,
    /// Disk write/verify failure, prior snapshot intact
    Persistence,
}

/// Why a single source failed during a refresh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("suspect refresh: {current} records where {previous} existed")]
    Suspect { current: usize, previous: usize },

    #[error("no usable records ({dropped} rows dropped)")]
    NoRecords { dropped: usize },

    #[error("{0}")]
    Persistence(String),
}

impl RefreshError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(e) if e.is_structural() => ErrorKind::Schema,
            Self::Fetch(_) => ErrorKind::Network,
            Self::Parse(_) => ErrorKind::Schema,
            Self::Suspect { .. } | Self::NoRecords { .. } => ErrorKind::Validation,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }
}
