//! Error types for mq-batch
//!
//! This module provides the error taxonomy for the batch engine:
//! - Pre-flight fatal errors (malformed input row, reserved key collision,
//!   unknown model shortname, registry/config problems) that abort a run
//!   before any provider request is issued
//! - Infrastructure errors (I/O, serialization) with `#[from]` conversions
//!
//! Per-row provider failures are deliberately *not* part of this type: the
//! dispatcher recovers them locally and surfaces them as data in the output
//! stream (an `error` field on the row), never as an `Error` from the run.

use thiserror::Error;

use crate::provider::ProviderError;

/// Result type alias for mq-batch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mq-batch
///
/// Every variant here is fatal to the run it occurs in. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// An input line could not be parsed as a record, or a file-source record
    /// is missing the required `prompt` field
    #[error("malformed record on line {line_number}: {message}")]
    MalformedRecord {
        /// 1-based line number in the input source
        line_number: u64,
        /// What was wrong with the line
        message: String,
    },

    /// An input record already contains a key in the reserved `tag:` namespace
    /// while tag extraction is enabled
    #[error("input record on line {line_number} contains reserved key {key:?}")]
    ReservedKeyCollision {
        /// 1-based line number of the offending record
        line_number: u64,
        /// The colliding key
        key: String,
    },

    /// Model shortname not present in the registry
    #[error("unknown model shortname: {0}")]
    UnknownModel(String),

    /// Registry file could not be loaded or parsed
    #[error("registry error ({path}): {message}")]
    Registry {
        /// Human-readable description of the problem
        message: String,
        /// Path of the registry file
        path: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "workers")
        key: Option<String>,
    },

    /// Provider error escalated outside the per-row recovery path
    ///
    /// Only reachable from direct provider usage (e.g., a connectivity
    /// check); the batch dispatcher converts provider errors into per-row
    /// failures instead.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error belongs to the pre-flight class: detected before
    /// any provider request is issued, with no output rows produced.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::MalformedRecord { .. }
                | Error::ReservedKeyCollision { .. }
                | Error::UnknownModel(_)
                | Error::Registry { .. }
                | Error::Config { .. }
        )
    }
}
