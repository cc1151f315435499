//! Parsing errors for ledger types

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid length for {kind}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown lifecycle code: {0}")]
    UnknownLifecycleCode(u8),
}

/// Result type for type parsing
pub type Result<T> = std::result::Result<T, TypesError>;
