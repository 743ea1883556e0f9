//! Error types for SFTP Relay
//!
//! Every failure the pipeline can surface maps onto one [`ErrorKind`], which
//! decides whether the invocation aborts (fatal) or only the current file
//! fails. Messages never carry credential material.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for transfer operations
#[derive(Error, Debug)]
pub enum TransferError {
    /// Secret store unreachable, timed out, or refused the read
    #[error("Secret '{secret_id}' unavailable: {message}")]
    SecretUnavailable { secret_id: String, message: String },

    /// Secret payload is not valid JSON or lacks the key field
    #[error("Secret '{secret_id}' is malformed: {message}")]
    SecretMalformed { secret_id: String, message: String },

    /// SSH authentication failed
    #[error("SSH authentication failed for '{user}@{host}': {message}")]
    AuthenticationFailed {
        user: String,
        host: String,
        message: String,
    },

    /// Network, DNS or connect timeout while reaching the SFTP host
    #[error("Host '{host}' unreachable: {message}")]
    HostUnreachable { host: String, message: String },

    /// Unexpected SSH/SFTP protocol behaviour (banner, handshake, host key)
    #[error("Protocol error with '{host}': {message}")]
    ProtocolError { host: String, message: String },

    /// Remote directory does not exist
    #[error("Remote directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// Remote path is not accessible
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Remote file disappeared between listing and read
    #[error("Remote file not found: {0}")]
    FileNotFound(PathBuf),

    /// Reading a remote file failed mid-stream
    #[error("Read of '{path}' failed: {message}")]
    ReadFailed { path: PathBuf, message: String },

    /// Transform identifier outside the known set
    #[error("Unsupported transform: {0}")]
    UnsupportedTransform(String),

    /// Buffering transform input exceeded the configured bound
    #[error("Transform input too large: more than {limit} bytes")]
    TransformInputTooLarge { limit: u64 },

    /// Transform could not process the content (corrupt archive, codec error)
    #[error("Transform '{transform}' failed: {message}")]
    TransformFailed { transform: String, message: String },

    /// Object storage unreachable or refused our credentials
    #[error("Object storage unavailable for '{key}': {message}")]
    SinkUnavailable { key: String, message: String },

    /// Object storage rejected the object (quota, invalid key)
    #[error("Object storage rejected '{key}': {message}")]
    SinkRejected { key: String, message: String },

    /// A bounded step exceeded its time limit
    #[error("{step} timed out after {seconds} seconds")]
    Timeout { step: String, seconds: u64 },

    /// Local staging I/O error
    #[error("Staging I/O error at '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable, serializable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Secret store unreachable
    SecretUnavailable,
    /// Secret payload malformed
    SecretMalformed,
    /// SSH authentication failed
    AuthenticationFailed,
    /// SFTP host unreachable
    HostUnreachable,
    /// SSH/SFTP protocol error
    ProtocolError,
    /// Remote directory missing
    DirectoryNotFound,
    /// Remote permission denied
    PermissionDenied,
    /// Remote file missing at read time
    FileNotFound,
    /// Remote read failure
    ReadFailed,
    /// Unknown transform identifier
    UnsupportedTransform,
    /// Transform input above bound
    TransformInputTooLarge,
    /// Transform processing failure
    TransformFailed,
    /// Object storage unavailable
    SinkUnavailable,
    /// Object storage rejected object
    SinkRejected,
    /// Step timeout
    Timeout,
    /// Local staging failure
    Staging,
    /// Invalid configuration
    Config,
}

impl ErrorKind {
    /// Whether this kind is fatal when raised by a session-level step
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SecretUnavailable
                | Self::SecretMalformed
                | Self::AuthenticationFailed
                | Self::HostUnreachable
                | Self::ProtocolError
                | Self::DirectoryNotFound
                | Self::PermissionDenied
                | Self::Config
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl TransferError {
    /// Create an authentication error
    pub fn auth(
        user: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::AuthenticationFailed {
            user: user.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create an unreachable-host error
    pub fn unreachable(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostUnreachable {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolError {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error for a named step
    pub fn timeout(step: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            step: step.into(),
            seconds: after.as_secs(),
        }
    }

    /// Create a staging I/O error with path context
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SecretUnavailable { .. } => ErrorKind::SecretUnavailable,
            Self::SecretMalformed { .. } => ErrorKind::SecretMalformed,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::HostUnreachable { .. } => ErrorKind::HostUnreachable,
            Self::ProtocolError { .. } => ErrorKind::ProtocolError,
            Self::DirectoryNotFound(_) => ErrorKind::DirectoryNotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::ReadFailed { .. } => ErrorKind::ReadFailed,
            Self::UnsupportedTransform(_) => ErrorKind::UnsupportedTransform,
            Self::TransformInputTooLarge { .. } => ErrorKind::TransformInputTooLarge,
            Self::TransformFailed { .. } => ErrorKind::TransformFailed,
            Self::SinkUnavailable { .. } => ErrorKind::SinkUnavailable,
            Self::SinkRejected { .. } => ErrorKind::SinkRejected,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Staging { .. } => ErrorKind::Staging,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Get the remote path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::DirectoryNotFound(path)
            | Self::PermissionDenied(path)
            | Self::FileNotFound(path)
            | Self::ReadFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Extension trait for adding staging path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TransferError::staging(path, e))
    }
}
