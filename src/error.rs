//! Error types for the IoT hub link.
//!
//! All errors are strongly typed using thiserror, one enum per layer,
//! folded into [`LinkError`] at the public surface.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by an external event or notification source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source unavailable: {message}")]
    Unavailable {
        message: String,
    },

    #[error("Receive failed: {message}")]
    Receive {
        message: String,
    },

    #[error("Close failed: {message}")]
    Close {
        message: String,
    },
}

impl SourceError {
    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a `Receive` error.
    #[must_use]
    pub fn receive(message: impl Into<String>) -> Self {
        Self::Receive {
            message: message.into(),
        }
    }

    /// Creates a `Close` error.
    #[must_use]
    pub fn close(message: impl Into<String>) -> Self {
        Self::Close {
            message: message.into(),
        }
    }

    /// The collaborator's message, without the variant prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Unavailable { message } | Self::Receive { message } | Self::Close { message } => message,
        }
    }
}

/// Errors surfaced by a streaming invocation.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Source unavailable: {message}")]
    SourceUnavailable {
        message: String,
    },

    #[error("Stream failed: {message}")]
    StreamFailure {
        message: String,
    },

    #[error("Stream disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Close hook already registered")]
    CloseHookRegistered,
}

/// Caller input errors.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Malformed input for '{field}': {reason}")]
    MalformedInput {
        field: String,
        reason: String,
    },

    #[error("Required parameter '{name}' is missing")]
    MissingParameter {
        name: String,
    },

    #[error("Invalid connection string: {reason}")]
    InvalidConnectionString {
        reason: String,
    },

    #[error("Unknown node: {path}")]
    UnknownNode {
        path: String,
    },

    #[error("Name '{name}' is already in use")]
    DuplicateName {
        name: String,
    },
}

/// Configuration load/save errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl LinkError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a `MalformedInput` error.
    #[must_use]
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Input(InputError::MalformedInput {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Returns true if a stream could not be opened.
    #[must_use]
    pub const fn is_source_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Stream(StreamError::SourceUnavailable { .. }) | Self::Source(SourceError::Unavailable { .. })
        )
    }

    /// Returns true if a running stream terminated with an error.
    #[must_use]
    pub const fn is_stream_failure(&self) -> bool {
        matches!(self, Self::Stream(StreamError::StreamFailure { .. }))
    }

    /// Returns true if this is a caller input error.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if waiting again may succeed.
    ///
    /// Stream opens and mid-stream reads are never retried automatically;
    /// only a timed-out wait on the caller side is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Stream(StreamError::Timeout { .. }))
    }
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
