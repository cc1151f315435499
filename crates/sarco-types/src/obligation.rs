//! Obligation records as read from the ledger
//!
//! The archaeologist does not own these records. It only classifies them
//! relative to its own identity during replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::TypesError;
use crate::ids::AgentIdentity;

/// Storage fee paid by the embalmer, in the ledger's smallest token unit.
pub type StorageFee = u128;

/// Lifecycle code stored on the ledger for each sarcophagus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LifecycleCode {
    NonExistent = 0,
    Active = 1,
    Finalized = 2,
}

impl TryFrom<u8> for LifecycleCode {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LifecycleCode::NonExistent),
            1 => Ok(LifecycleCode::Active),
            2 => Ok(LifecycleCode::Finalized),
            other => Err(TypesError::UnknownLifecycleCode(other)),
        }
    }
}

impl fmt::Display for LifecycleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleCode::NonExistent => write!(f, "non-existent"),
            LifecycleCode::Active => write!(f, "active"),
            LifecycleCode::Finalized => write!(f, "finalized"),
        }
    }
}

/// Locator of the encrypted payload in content-addressed storage.
///
/// Empty until the embalmer uploads the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadLocator(String);

impl PayloadLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Content identifier with any `scheme://` prefix removed.
    pub fn content_id(&self) -> &str {
        match self.0.split_once("://") {
            Some((_, id)) => id,
            None => &self.0,
        }
    }
}

impl fmt::Display for PayloadLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sarcophagus as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationRecord {
    /// Lifecycle code
    pub code: LifecycleCode,

    /// Archaeologist assigned to the sarcophagus
    pub archaeologist: AgentIdentity,

    /// Earliest time the payload may be released
    pub resurrection_time: DateTime<Utc>,

    /// How long after the resurrection time an unwrap is still accepted
    pub resurrection_window: Duration,

    /// Payload locator, empty until uploaded
    pub payload: PayloadLocator,

    /// Storage fee attached by the embalmer
    pub storage_fee: StorageFee,
}

impl ObligationRecord {
    pub fn is_assigned_to(&self, agent: &AgentIdentity) -> bool {
        &self.archaeologist == agent
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// End of the interval during which an unwrap is valid.
    pub fn window_end(&self) -> DateTime<Utc> {
        window_end(self.resurrection_time, self.resurrection_window)
    }

    /// Whether the resurrection window has fully elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end()
    }
}

/// Resurrection time plus window, saturating on overflow.
pub fn window_end(resurrection_time: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| resurrection_time.checked_add_signed(w))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
