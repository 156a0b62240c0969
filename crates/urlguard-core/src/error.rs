//! Error types for URLGuard

use std::time::Duration;
use thiserror::Error;

/// URLGuard error type
#[derive(Error, Debug)]
pub enum GuardError {
    /// URL could not be parsed or has no usable host
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A probe did not finish inside its deadline
    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    /// A probe failed for any other reason
    #[error("probe fault: {0}")]
    ProbeFault(String),

    /// Cache backend unreachable or misbehaving
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for URLGuard
pub type GuardResult<T> = Result<T, GuardError>;

/// Failure of a single probe invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Collaborator did not answer within its budget
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Network error, malformed response, missing local resource
    #[error("{0}")]
    Adapter(String),
}

impl ProbeError {
    pub fn adapter(msg: impl Into<String>) -> Self {
        ProbeError::Adapter(msg.into())
    }
}

impl From<ProbeError> for GuardError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Timeout(d) => GuardError::ProbeTimeout(d),
            ProbeError::Adapter(msg) => GuardError::ProbeFault(msg),
        }
    }
}

/// Cache store errors. Never fatal to an evaluation.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<CacheError> for GuardError {
    fn from(err: CacheError) -> Self {
        GuardError::CacheUnavailable(err.to_string())
    }
}
