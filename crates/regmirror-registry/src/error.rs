//! Error types for registry operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Coarse classification used by callers to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The repository, image or token does not exist.
    NotFound,
    /// A create raced with another create.
    AlreadyExists,
    /// Worth retrying: throttling, expired token, timeouts, 5xx.
    Transient,
    /// Retrying will not help.
    Fatal,
}

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The provider CLI could not be started.
    #[error("Failed to run {program}: {source}")]
    CommandSpawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The provider CLI did not finish in time.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Timeout in seconds.
        seconds: u64,
    },

    /// Repository or image not found.
    #[error("Not found during {operation}: {repository}")]
    NotFound {
        /// Operation name.
        operation: String,
        /// Repository path.
        repository: String,
    },

    /// Repository already exists.
    #[error("Repository already exists: {repository}")]
    AlreadyExists {
        /// Repository path.
        repository: String,
    },

    /// The caller is not authorized.
    #[error("Access denied during {operation}: {message}")]
    AccessDenied {
        /// Operation name.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Throttling, expired credentials or a provider-side fault.
    #[error("Transient failure during {operation}: {message}")]
    Transient {
        /// Operation name.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// Any other non-zero provider exit.
    #[error("{operation} failed (exit code {code:?}): {message}")]
    CommandFailed {
        /// Operation name.
        operation: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Provider message.
        message: String,
    },

    /// The provider answered with something unexpected.
    #[error("Invalid response from {operation}: {message}")]
    InvalidResponse {
        /// Operation name.
        operation: String,
        /// What was wrong.
        message: String,
    },

    /// Authorization token could not be decoded.
    #[error("Invalid authorization token: {message}")]
    InvalidToken {
        /// What was wrong.
        message: String,
    },

    /// Attaching the access policy to a new repository failed.
    #[error("Failed to attach policy to {repository}: {message}")]
    PolicyAttachFailed {
        /// Repository path.
        repository: String,
        /// Underlying error message.
        message: String,
    },

    /// Failed to connect to a chart repository.
    #[error("Failed to connect to {url}: {source}")]
    ConnectionFailed {
        /// Target URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error from a chart repository.
    #[error("HTTP error from {url}: {status}")]
    HttpError {
        /// Target URL.
        url: String,
        /// HTTP status code (0 when unknown).
        status: u16,
    },

    /// A chart repository index could not be parsed.
    #[error("Invalid chart index at {url}: {message}")]
    InvalidIndex {
        /// Index URL.
        url: String,
        /// Parse error.
        message: String,
    },

    /// A chart list entry is neither a `.tgz` URL nor a repository URL.
    #[error("Invalid chart entry {entry}: {message}")]
    InvalidChart {
        /// The list entry.
        entry: String,
        /// What was wrong.
        message: String,
    },

    /// Checksum mismatch on a downloaded chart archive.
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Archive URL.
        url: String,
        /// Expected digest.
        expected: String,
        /// Actual digest.
        actual: String,
    },

    /// File I/O error.
    #[error("File I/O error at {path}: {source}")]
    IoError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Timeout { .. } | Self::Transient { .. } | Self::ConnectionFailed { .. } => {
                ErrorKind::Transient
            }
            Self::HttpError { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Transient
            }
            _ => ErrorKind::Fatal,
        }
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        if err.is_status() {
            Self::HttpError {
                url,
                status: err.status().map_or(0, |s| s.as_u16()),
            }
        } else {
            Self::ConnectionFailed { url, source: err }
        }
    }
}
