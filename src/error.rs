//! Error types for the index engine.

use thiserror::Error;

/// Errors surfaced by index construction and serialization.
///
/// Data irregularities that occur in normal operation (empty datasets,
/// unknown tier bytes on persisted keys) are not errors; those paths log a
/// warning and return an empty or `None` result instead.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Persisted bytes are truncated, carry an unknown type tag, or are
    /// internally inconsistent.
    #[error("corrupt binary format: {0}")]
    CorruptFormat(String),

    /// A caller-supplied argument is outside the accepted domain.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TesseraError>;
