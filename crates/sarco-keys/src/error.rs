//! Error types for key handling

use thiserror::Error;

/// Key material errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid seed encoding: {0}")]
    InvalidSeedEncoding(String),

    #[error("Invalid seed length: expected 32 bytes, got {0}")]
    InvalidSeedLength(usize),
}

pub type Result<T> = std::result::Result<T, KeyError>;
