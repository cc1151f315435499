//! Live ledger notifications
//!
//! The ledger emits one event per state change of a sarcophagus. The
//! archaeologist consumes them in arrival order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::ids::{AgentIdentity, ObligationId};
use crate::obligation::{PayloadLocator, StorageFee};

/// Notification emitted by the ledger for a single obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationEvent {
    /// A sarcophagus was created.
    Created {
        id: ObligationId,
        archaeologist: AgentIdentity,
        resurrection_time: DateTime<Utc>,
        resurrection_window: Duration,
        storage_fee: StorageFee,
    },

    /// The embalmer uploaded the payload.
    Updated {
        id: ObligationId,
        payload_locator: PayloadLocator,
        resurrection_time: DateTime<Utc>,
    },

    /// The sarcophagus reached a terminal state.
    Finalized {
        id: ObligationId,
        reason: FinalizationReason,
    },
}

impl ObligationEvent {
    pub fn obligation_id(&self) -> &ObligationId {
        match self {
            ObligationEvent::Created { id, .. }
            | ObligationEvent::Updated { id, .. }
            | ObligationEvent::Finalized { id, .. } => id,
        }
    }
}

/// How a sarcophagus left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationReason {
    /// Unwrapped by an archaeologist
    Unwrapped,
    /// Cancelled by the embalmer before upload
    Cancelled,
    /// Archaeologist was accused of leaking the key
    Accused,
    /// Embalmer buried it
    Buried,
}

impl fmt::Display for FinalizationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizationReason::Unwrapped => write!(f, "unwrapped"),
            FinalizationReason::Cancelled => write!(f, "cancelled"),
            FinalizationReason::Accused => write!(f, "accused"),
            FinalizationReason::Buried => write!(f, "buried"),
        }
    }
}

/// Receipt returned by the ledger for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: String,
}

impl TransactionReceipt {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
        }
    }
}

impl fmt::Display for TransactionReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tx_hash)
    }
}
