//! Error types for the sync engine.
//!
//! [`EngineError`] ends a run. [`ArtifactError`] ends only the artifact it
//! belongs to and is recorded as a failed outcome.

use regmirror_registry::RegistryError;
use thiserror::Error;

/// Result type alias for run-scoped operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Destination credentials could not be obtained.
    #[error("destination authentication failed: {0}")]
    DestinationAuth(#[source] RegistryError),

    /// The destination registry rejected the chart tool login.
    #[error("chart registry login failed: {0}")]
    ChartLogin(#[source] TransferError),

    /// Configuration, list or ledger problem.
    #[error(transparent)]
    Core(#[from] regmirror_core::Error),

    /// Scratch space for chart downloads could not be created.
    #[error("failed to create working directory: {0}")]
    WorkDir(#[source] std::io::Error),

    /// Invalid engine configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason for invalidity.
        reason: String,
    },
}

/// Errors produced by an external transfer tool.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The tool exited non-zero.
    #[error("{program} exited with {code:?}: {output}")]
    Failed {
        /// Program name.
        program: String,
        /// Exit code, if any.
        code: Option<i32>,
        /// Tail of the combined output.
        output: String,
    },

    /// The tool was killed because the run was aborted.
    #[error("{program} was cancelled")]
    Cancelled {
        /// Program name.
        program: String,
    },
}

impl TransferError {
    /// Returns true if the tool output points at a transient registry problem.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        const TRANSIENT: &[&str] = &[
            "toomanyrequests",
            "429 Too Many Requests",
            "500 Internal Server Error",
            "502 Bad Gateway",
            "503 Service Unavailable",
            "504 Gateway Timeout",
            "i/o timeout",
            "connection reset by peer",
            "TLS handshake timeout",
            "unexpected EOF",
        ];
        match self {
            Self::Failed { output, .. } => TRANSIENT.iter().any(|t| output.contains(t)),
            Self::Spawn { .. } | Self::Cancelled { .. } => false,
        }
    }
}

/// Errors that fail one artifact.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// The declared line is not a valid reference.
    #[error("invalid reference: {0}")]
    InvalidReference(#[source] regmirror_core::Error),

    /// The destination repository could not be provisioned.
    #[error("provisioning failed: {0}")]
    Provision(#[source] RegistryError),

    /// Origin credentials could not be obtained.
    #[error("origin authentication failed: {0}")]
    OriginAuth(#[source] RegistryError),

    /// Chart expansion or download failed.
    #[error("chart fetch failed: {0}")]
    ChartFetch(#[source] RegistryError),

    /// The copy or push failed.
    #[error("transfer failed: {0}")]
    Transfer(#[source] TransferError),
}

/// Errors a retry loop can inspect.
pub trait Retryable {
    /// Returns true if another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for RegistryError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_retryable() {
        let throttled = TransferError::Failed {
            program: "skopeo".to_string(),
            code: Some(1),
            output: "reading manifest: toomanyrequests: You have reached your pull rate limit"
                .to_string(),
        };
        assert!(throttled.is_retryable());

        let unknown = TransferError::Failed {
            program: "skopeo".to_string(),
            code: Some(1),
            output: "manifest unknown".to_string(),
        };
        assert!(!unknown.is_retryable());

        // Credentials are fixed for the run, so a retry would fail the same way.
        let expired = TransferError::Failed {
            program: "skopeo".to_string(),
            code: Some(1),
            output: "denied: Your authorization token has expired. Reauthenticate and try again."
                .to_string(),
        };
        assert!(!expired.is_retryable());

        let cancelled = TransferError::Cancelled {
            program: "skopeo".to_string(),
        };
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = ArtifactError::Transfer(TransferError::Failed {
            program: "skopeo".to_string(),
            code: Some(1),
            output: "manifest unknown".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "transfer failed: skopeo exited with Some(1): manifest unknown"
        );
    }
}
