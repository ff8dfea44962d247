//! Error types for CSRF protection.

use thiserror::Error;

/// Errors raised while creating or rotating tokens.
///
/// [`TokenValidator::validate`](crate::TokenValidator::validate) never returns
/// these; it turns them into a rejection.
#[derive(Error, Debug)]
pub enum CsrfError {
    #[error("Token generation failed: {0}")]
    Generation(String),
}

impl From<rand::Error> for CsrfError {
    fn from(err: rand::Error) -> Self {
        CsrfError::Generation(err.to_string())
    }
}

/// Errors raised while loading or compiling configuration.
///
/// These are fatal: a guard is never built from a configuration that fails here.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("Unknown random source: {0}")]
    UnknownPrng(String),

    #[error("Unknown reject action: {0}")]
    UnknownAction(String),

    #[error("Invalid page pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, CsrfError>;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
