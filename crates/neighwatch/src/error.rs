//! Error types for neighwatch
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-11: Error Handling - Structured error types with contextual information
//! - AU-3: Content of Audit Records - Errors include sufficient detail for audit

use std::io;
use thiserror::Error;

/// Failure of one phase of a neighbor table query.
///
/// Any of these aborts the whole snapshot; partial tables are never returned.
///
/// # NIST Controls
/// - SI-11(a): Generate error messages providing information necessary for corrective actions
#[derive(Debug, Error)]
pub enum QueryError {
    /// Sizing call to the kernel failed
    #[error("length query failed: {0}")]
    LengthQuery(#[source] io::Error),

    /// Could not reserve a buffer of the size the kernel asked for
    #[error("allocation failed: {bytes} bytes")]
    Allocation { bytes: usize },

    /// Fetching the table contents failed
    #[error("data query failed: {0}")]
    DataQuery(#[source] io::Error),

    /// A record in the kernel buffer does not fit its declared bounds
    /// NIST: SI-10 (Information Input Validation) - Bounds-checked decoding
    #[error("malformed message at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// Requested backend does not exist on this platform
    #[error("neighbor source '{0}' is not supported on this platform")]
    Unsupported(&'static str),
}

impl QueryError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur in neighwatch
///
/// # NIST Controls
/// - SI-11(b): Reveal only information necessary for error handling (no sensitive data exposure)
#[derive(Debug, Error)]
pub enum NeighwatchError {
    /// Neighbor table query failed
    /// NIST: SC-7 (Boundary Protection) - Kernel interface errors
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Caller passed a malformed argument
    /// NIST: SI-10 (Information Input Validation)
    #[error("Type error: {0}")]
    Type(String),

    /// Operation invalid for the current watcher lifecycle state
    #[error("State error: {0}")]
    State(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    /// NIST: CM-6 (Configuration Settings) - Configuration validation
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for neighwatch operations
pub type Result<T> = std::result::Result<T, NeighwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display() {
        let err = NeighwatchError::from(QueryError::Allocation { bytes: 4096 });
        assert_eq!(err.to_string(), "Query error: allocation failed: 4096 bytes");
    }

    #[test]
    fn test_malformed_display() {
        let err = QueryError::malformed(92, "zero-length message");
        assert_eq!(
            err.to_string(),
            "malformed message at offset 92: zero-length message"
        );
    }

    #[test]
    fn test_state_error_display() {
        let err = NeighwatchError::State("start called before set".to_string());
        assert_eq!(err.to_string(), "State error: start called before set");
    }

    #[test]
    fn test_length_query_keeps_source() {
        use std::error::Error as _;
        let err = QueryError::LengthQuery(io::Error::from_raw_os_error(libc::ENOMEM));
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("length query failed"));
    }
}
