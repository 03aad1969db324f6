//! Custom error types for translation operations

use std::time::Duration;
use thiserror::Error;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Markup could not be turned into a content tree
    #[error("Parse error: {message}")]
    ParseError {
        message: String,
    },

    /// Invalid provider or engine configuration
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Rate limit exceeded, locally or reported by the backend
    #[error("Rate limit exceeded. Retry after {retry_after:?}")]
    RateLimitError {
        retry_after: Option<Duration>,
    },

    /// Backend rejected or failed the call
    #[error("Provider error ({provider}): {message}")]
    ProviderError {
        provider: String,
        message: String,
        transient: bool,
        status: Option<u16>,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// Invalid response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        message: String,
    },

    /// Request timeout
    #[error("Request timeout after {elapsed:?}")]
    TimeoutError {
        elapsed: Duration,
    },

    /// Tree metadata needed to regenerate markup is missing
    #[error("Reconstruction error: {message}")]
    ReconstructionError {
        message: String,
    },

    /// Chapter id not present in the progress record
    #[error("Unknown chapter: {chapter_id}")]
    UnknownChapter {
        chapter_id: String,
    },

    /// Work was stopped by the task-level cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// File operation error
    #[error("File error: {path} - {message}")]
    FileError {
        path: String,
        message: String,
    },

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Layered configuration error
    #[error("Config source error: {0}")]
    ConfigSourceError(#[from] config::ConfigError),
}

impl TranslationError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        TranslationError::ConfigError {
            message: message.into(),
        }
    }

    /// Transient provider failure, eligible for retry
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        TranslationError::ProviderError {
            provider: provider.into(),
            message: message.into(),
            transient: true,
            status: None,
        }
    }

    /// Terminal provider failure
    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        TranslationError::ProviderError {
            provider: provider.into(),
            message: message.into(),
            transient: false,
            status: None,
        }
    }

    /// Whether a failed call may be attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslationError::RateLimitError { .. } => true,
            TranslationError::ProviderError { transient, .. } => *transient,
            TranslationError::NetworkError { .. } => true,
            TranslationError::InvalidResponseError { .. } => true,
            TranslationError::TimeoutError { .. } => true,
            TranslationError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Backend-suggested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslationError::RateLimitError { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<anyhow::Error> for TranslationError {
    fn from(err: anyhow::Error) -> Self {
        TranslationError::InternalError(err.to_string())
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
