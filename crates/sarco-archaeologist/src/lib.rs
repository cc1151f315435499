//! # Sarco Archaeologist - Lifecycle core of a sarcophagus archaeologist
//!
//! An archaeologist holds one derived key per sarcophagus it is bonded to
//! and must publish that key (the "unwrap") once the resurrection time
//! arrives. This crate owns the in-memory lifecycle of those obligations.
//!
//! ## Overview
//!
//! - **Reconciliation**: Replay the ledger in index order to rebuild the
//!   lifecycle map, the pending uploads and the key index counter
//! - **Scheduling**: One cancellable one-shot unwrap timer per obligation
//! - **Live events**: Apply creations, uploads and finalizations as they arrive
//!
//! All mutable state lives in a single [`LedgerState`] behind one mutex.
//! No lock is held across ledger, storage or submission calls.
//!
//! ## Architectural Boundaries
//!
//! - **sarco-keys** owns key derivation from the master seed
//! - The ledger client and the payload cipher are provided by the embedding
//!   process through [`LedgerClient`] and [`PayloadCipher`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sarco_archaeologist::{
//!     Archaeologist,
//!     mock::{MockCipher, MockLedger, MockPayloadStore},
//! };
//! use sarco_keys::{Blake3KeyDeriver, MasterSeed};
//! use sarco_types::AgentIdentity;
//!
//! # async fn example() -> sarco_archaeologist::Result<()> {
//! let archaeologist = Archaeologist::new(
//!     AgentIdentity::from_bytes([0x11; 20]),
//!     Arc::new(MockLedger::new()),
//!     Arc::new(MockPayloadStore::new()),
//!     Arc::new(MockCipher),
//!     Arc::new(Blake3KeyDeriver::new(MasterSeed::from_bytes([7; 32]))),
//! );
//!
//! let initial = archaeologist.reconcile().await?;
//! let handle = archaeologist.start(initial)?;
//! println!("encrypt new sarcophagi to {}", handle.current_public_key());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod agent;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod index_cache;
pub mod mock;
pub mod reactor;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod telemetry;

// Re-export main types
pub use agent::{Archaeologist, ArchaeologistHandle};
pub use clients::{LedgerClient, ObligationEventStream, PayloadCipher, PayloadStore};
pub use config::ArchaeologistConfig;
pub use error::{ArchaeologistError, Result};
pub use events::ArchaeologistEvent;
pub use index_cache::{FileKeyIndexCache, InMemoryKeyIndexCache, KeyIndexCache};
pub use reactor::{EventReactor, ReactorOutcome};
pub use reconciler::{InitialState, LifecycleReconciler, ReconcileReport};
pub use retry::RetryPolicy;
pub use scheduler::ResurrectionScheduler;
pub use state::{LedgerState, LifecycleEntry, SharedState, StateSnapshot};
pub use storage::HttpPayloadStore;
pub use telemetry::init_tracing;
