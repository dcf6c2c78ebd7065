/*!
 * Error Handling Module
 *
 * DESIGN DECISION: One thiserror enum and a crate-wide Result alias
 * WHY: Library code never panics; every fallible operation returns Result
 * with a variant callers can match on
 *
 * REASONING CHAIN:
 * 1. The resolve path never surfaces chemistry-data problems as errors:
 *    those downgrade to UNKNOWN/NOVEL_COMPOUND and land in the decision log
 * 2. The variants here cover storage, config, and index failures that
 *    callers must actually handle
 * 3. From impls for rusqlite/io/serde errors keep `?` propagation clean
 */

use thiserror::Error;

/// Primary error type for the resolver crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A loaded configuration violates a control-surface invariant.
    /// Startup fails closed on this variant.
    #[error("configuration invariant violated: {0}")]
    ConfigInvariant(String),

    /// SQLite-level failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// File read/write failure (index files, config files).
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Corpus data violates a structural requirement (duplicate CAS number,
    /// parent cycle, synonym referencing a missing analyte).
    #[error("corpus inconsistency: {0}")]
    CorpusInconsistency(String),

    /// More than one row existed for a `(vendor, observed_text)` pair.
    /// One row is kept, the rest are quarantined.
    #[error("vendor cache conflict: {0}")]
    VendorCacheConflict(String),

    /// The semantic index could not be loaded. The resolver treats this as
    /// non-fatal and proceeds without the semantic signal.
    #[error("semantic index unavailable: {0}")]
    IndexUnavailable(String),

    /// A vector's dimensionality does not match the active encoder.
    #[error("encoder dimension mismatch: expected {expected}, got {actual}")]
    EncoderDimMismatch { expected: usize, actual: usize },

    /// Confidence score outside [0.0, 1.0].
    #[error("invalid confidence score: {0} (must be between 0.0 and 1.0)")]
    InvalidConfidence(f64),

    /// Malformed caller input (outside the chemistry-data downgrade path).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = Error::InvalidConfidence(1.5);
        assert!(err.to_string().contains("must be between 0.0 and 1.0"));

        let err = Error::CorpusInconsistency("duplicate CAS 71-43-2".into());
        assert_eq!(err.to_string(), "corpus inconsistency: duplicate CAS 71-43-2");
    }

    #[test]
    fn conversion_from_external_errors() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        assert!(matches!(Error::from(json_err), Error::Serialization(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        match Error::from(io_err) {
            Error::Io(msg) => assert!(msg.contains("missing")),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
