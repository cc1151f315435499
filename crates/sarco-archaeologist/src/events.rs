//! Events emitted by the archaeologist for monitoring and audit.

use chrono::{DateTime, Utc};
use sarco_keys::PublicKeyBytes;
use sarco_types::{FinalizationReason, KeyIndex, ObligationId, TransactionReceipt};
use tokio::sync::broadcast;

/// Channel capacity for archaeologist events
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something the archaeologist did or decided.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchaeologistEvent {
    /// A key index was bound to an obligation.
    KeyBound {
        obligation: ObligationId,
        key_index: KeyIndex,
        next_public_key: PublicKeyBytes,
    },

    /// An unwrap timer was armed or re-armed.
    TimerArmed {
        obligation: ObligationId,
        key_index: KeyIndex,
        resurrection_time: DateTime<Utc>,
    },

    /// An armed timer was cancelled before firing.
    TimerCancelled { obligation: ObligationId },

    /// The obligation reached a terminal state on the ledger.
    ObligationFinalized {
        obligation: ObligationId,
        reason: FinalizationReason,
    },

    /// Unwrap transaction accepted by the ledger.
    UnwrapSubmitted {
        obligation: ObligationId,
        key_index: KeyIndex,
        receipt: TransactionReceipt,
    },

    /// Unwrap abandoned; the obligation is no longer tracked.
    UnwrapFailed {
        obligation: ObligationId,
        key_index: KeyIndex,
        reason: String,
    },

    /// The timer fired after the resurrection window closed.
    UnwrapExpired {
        obligation: ObligationId,
        key_index: KeyIndex,
    },
}

impl ArchaeologistEvent {
    pub fn obligation(&self) -> &ObligationId {
        match self {
            ArchaeologistEvent::KeyBound { obligation, .. }
            | ArchaeologistEvent::TimerArmed { obligation, .. }
            | ArchaeologistEvent::TimerCancelled { obligation }
            | ArchaeologistEvent::ObligationFinalized { obligation, .. }
            | ArchaeologistEvent::UnwrapSubmitted { obligation, .. }
            | ArchaeologistEvent::UnwrapFailed { obligation, .. }
            | ArchaeologistEvent::UnwrapExpired { obligation, .. } => obligation,
        }
    }
}

pub(crate) fn channel() -> broadcast::Sender<ArchaeologistEvent> {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}
