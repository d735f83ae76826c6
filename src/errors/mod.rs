//! # Error Handling
//!
//! Custom error types for the provider using `thiserror`. Each variant maps
//! to one of the failure categories the driver can observe: configuration
//! errors become `InvalidArgument`, credential-resolution errors become
//! `PermissionDenied`, and per-item fetch errors carry the backend's own
//! status code.

use tonic::Code;

/// Custom result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Main error type for the provider
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    /// Malformed mount attributes, conflicting auth modes, bad permissions
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential resolution failures (metadata, token issuance, exchange,
    /// impersonation)
    #[error("Credential error: {0}")]
    Auth(String),

    /// Per-item fetch failures, carrying the backend status code
    #[error("{message}")]
    Fetch { code: Code, message: String },

    /// Network transport errors (connection setup, request dispatch)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new credential-resolution error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth(message.into())
    }

    /// Create a per-item fetch error with an explicit status code
    pub fn fetch<S: Into<String>>(code: Code, message: S) -> Self {
        Self::Fetch { code, message: message.into() }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// The gRPC status code this error category translates to.
    pub fn code(&self) -> Code {
        match self {
            Self::Config(_) => Code::InvalidArgument,
            Self::Auth(_) => Code::PermissionDenied,
            Self::Fetch { code, .. } => *code,
            Self::Transport(_) => Code::Unavailable,
            Self::Io(_) | Self::Internal(_) => Code::Internal,
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        tonic::Status::new(err.code(), err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Fetch { code: Code::DeadlineExceeded, message: err.to_string() }
        } else {
            Self::Transport(err.to_string())
        }
    }
}
