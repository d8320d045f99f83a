//! Error types for regmirror core operations.
//!
//! Everything in this crate that can fail at run start (missing list files,
//! malformed configuration, bad references) surfaces as an [`Error`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in regmirror core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A list, template or policy file could not be read or written.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path of the file involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is malformed.
    #[error("Invalid configuration in {path}: {source}")]
    ConfigParse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration is well-formed but semantically invalid.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration was rejected.
        reason: String,
    },

    /// The access-policy document is not valid JSON.
    #[error("Malformed access policy {path}: {source}")]
    MalformedPolicy {
        /// Path to the policy document.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An artifact reference could not be parsed.
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The offending reference.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl Error {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds an [`Error::InvalidReference`].
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}
