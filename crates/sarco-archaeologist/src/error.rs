//! Error types for the archaeologist core

use sarco_types::{KeyIndex, ObligationId};
use thiserror::Error;

/// Archaeologist error type
#[derive(Debug, Error)]
pub enum ArchaeologistError {
    /// Configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// Agent identity is malformed
    #[error("Invalid identity: {0}")]
    InvalidIdentity(#[from] sarco_types::TypesError),

    /// Invalid key material
    #[error("Key error: {0}")]
    Key(#[from] sarco_keys::KeyError),

    /// Ledger read or subscription failed
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Payload fetch failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Payload could not be decrypted with the bound key
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// Unwrap transaction was rejected or could not be sent
    #[error("Unwrap submission failed: {0}")]
    Submission(String),

    /// Ledger data contradicts local state
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Replayed key index disagrees with the cached one
    #[error(
        "Key index divergence: cached {cached}, replayed {replayed} ({})",
        divergence_hint(.cached, .replayed)
    )]
    IndexDivergence { cached: KeyIndex, replayed: KeyIndex },

    /// An operation kept failing until its attempt budget ran out
    #[error("{operation} for {obligation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        obligation: ObligationId,
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// Obligation is not tracked by this agent
    #[error("Obligation not tracked: {0}")]
    NotTracked(ObligationId),

    /// Key index cache could not be read or written
    #[error("Key index cache error: {0}")]
    Cache(String),

    /// The agent was already started
    #[error("Archaeologist already started")]
    AlreadyStarted,
}

/// Result type for archaeologist operations
pub type Result<T> = std::result::Result<T, ArchaeologistError>;

impl ArchaeologistError {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArchaeologistError::Ledger(_)
                | ArchaeologistError::Storage(_)
                | ArchaeologistError::Submission(_)
        )
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency(message.into())
    }
}

fn divergence_hint(cached: &KeyIndex, replayed: &KeyIndex) -> &'static str {
    if replayed > cached {
        "ledger advanced while the cache was not updated; delete the cache to accept the replay"
    } else {
        "replay consumed fewer indices than were handed out; keys may be reused"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ArchaeologistError::Storage("timeout".into()).is_transient());
        assert!(ArchaeologistError::Submission("nonce".into()).is_transient());
        assert!(!ArchaeologistError::Decrypt("bad mac".into()).is_transient());
        assert!(!ArchaeologistError::consistency("double bind").is_transient());
    }

    #[test]
    fn test_divergence_message_names_direction() {
        let behind = ArchaeologistError::IndexDivergence {
            cached: KeyIndex::new(3),
            replayed: KeyIndex::new(5),
        };
        assert!(behind.to_string().contains("ledger advanced"));

        let lost = ArchaeologistError::IndexDivergence {
            cached: KeyIndex::new(5),
            replayed: KeyIndex::new(3),
        };
        assert!(lost.to_string().contains("keys may be reused"));
    }
}
