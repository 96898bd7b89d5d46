//! Error types for cacheprog
//!
//! All modules use `ProxyResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cacheprog operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// All errors that can occur in cacheprog
#[derive(Error, Debug)]
pub enum ProxyError {
    // Protocol errors
    #[error("only got {actual} bytes of declared {declared}")]
    Desync { declared: i64, actual: usize },

    #[error("decoding put body: {0}")]
    BodyFrame(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("invalid body size {0}")]
    InvalidBodySize(i64),

    // Store errors
    #[error("corrupt index entry for action {action_id}: {reason}")]
    CorruptIndex { action_id: String, reason: String },

    #[error("not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("wrote {written} bytes, expected {expected}")]
    SizeMismatch { expected: u64, written: u64 },

    #[error("invalid {what} {value:?}: not lowercase hex")]
    InvalidHex { what: &'static str, value: String },

    // Remote errors
    #[error("{backend} remote: {message}")]
    Remote {
        backend: &'static str,
        message: String,
    },

    #[error("Access token error: {0}")]
    AccessToken(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid setting: {0}")]
    Setting(String),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a remote backend error
    pub fn remote(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Remote {
            backend,
            message: message.into(),
        }
    }

    /// Whether the error leaves the input stream at an unknown offset.
    ///
    /// Fatal errors end the session; everything else is scoped to one request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Desync { .. } | Self::BodyFrame(_))
    }

    /// Whether the error describes untrustworthy cache state rather than an
    /// I/O failure.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::CorruptIndex { .. } | Self::NotRegularFile(_) | Self::InvalidHex { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Desync { .. } | Self::BodyFrame(_) => {
                Some("The caller must restart the cache program")
            }
            Self::AccessToken(_) => Some("Run: gcloud auth login"),
            Self::ConfigInvalid { .. } => Some("Run: cacheprog config init --force"),
            _ => None,
        }
    }
}
