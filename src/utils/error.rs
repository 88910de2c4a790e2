use thiserror::Error;

/// Engine error with rich context and automatic error trait implementations
///
/// Design: Uses thiserror for ergonomic error handling with context.
/// Each variant carries meaningful context to help with debugging.
///
/// "Not found" is never an error: lookups report it as an empty list or
/// `None`, so there is no variant for it here.
#[derive(Error, Debug)]
pub enum BiomapperError {
    // Caller-supplied data violates a contract; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource '{resource}' is not registered")]
    UnknownResource { resource: String },

    // Per-adapter deadline expired; the dispatcher moves on
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    // A backend raised; captured per attempt, fatal only with fallback off
    #[error("Resource '{resource}' failed: {message}")]
    Adapter { resource: String, message: String },

    // Missing or malformed required configuration; fatal at construction
    #[error("Configuration error: {0}")]
    Config(String),

    // Backing service unreachable at construction time; fatal
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    // Database errors - auto-convert from sqlx::Error
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BiomapperError {
    /// Helper to create validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Helper to create unknown-resource error
    pub fn unknown_resource(resource: impl Into<String>) -> Self {
        Self::UnknownResource { resource: resource.into() }
    }

    /// Helper to create adapter error
    pub fn adapter(resource: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Adapter { resource: resource.into(), message: message.to_string() }
    }

    /// Helper to create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Helper to create connectivity error
    pub fn connectivity(message: impl std::fmt::Display) -> Self {
        Self::Connectivity(message.to_string())
    }

    /// Whether this error should abort the whole request rather than
    /// just the current resource attempt
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::UnknownResource { .. } | Self::Config(_) | Self::Store(_)
        )
    }
}

impl From<serde_json::Error> for BiomapperError {
    fn from(err: serde_json::Error) -> Self {
        BiomapperError::Validation(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, BiomapperError>;
