//! Sarco Types - Ledger-facing types for the archaeologist service
//!
//! An archaeologist is bonded to release sarcophagi (obligations) recorded on
//! a public ledger. This crate holds the data model shared by the key
//! deriver and the archaeologist core.
//!
//! ## Key Concepts
//!
//! - **ObligationId**: Fixed-size identifier the ledger assigns to a sarcophagus
//! - **AgentIdentity**: Ledger address of an archaeologist
//! - **ObligationRecord**: Snapshot of a sarcophagus as read from the ledger
//! - **KeyIndex**: Position in the deterministic per-obligation key sequence
//! - **ObligationEvent**: Live notifications emitted by the ledger

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod events;
pub mod ids;
pub mod obligation;

// Re-export main types
pub use error::TypesError;
pub use events::{FinalizationReason, ObligationEvent, TransactionReceipt};
pub use ids::{AgentIdentity, KeyIndex, ObligationId};
pub use obligation::{window_end, LifecycleCode, ObligationRecord, PayloadLocator, StorageFee};
