//! Collaborator interfaces consumed by the archaeologist.
//!
//! The ledger client, the payload store and the payload cipher are owned by
//! other layers. The core only sees them through these traits.

use async_trait::async_trait;
use futures::stream::BoxStream;
use sarco_keys::DerivedKey;
use sarco_types::{ObligationEvent, ObligationId, ObligationRecord, PayloadLocator, TransactionReceipt};

use crate::error::Result;

/// Live, ordered stream of ledger notifications.
pub type ObligationEventStream = BoxStream<'static, ObligationEvent>;

/// Read and write access to the sarcophagus ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Total number of sarcophagi ever created.
    async fn obligation_count(&self) -> Result<u64>;

    /// Identifier of the sarcophagus at a ledger index.
    async fn identifier_at(&self, index: u64) -> Result<ObligationId>;

    /// Record for an identifier, `None` if the ledger has no such record.
    async fn record(&self, id: &ObligationId) -> Result<Option<ObligationRecord>>;

    /// Identifier and record at a ledger index.
    async fn record_at(&self, index: u64) -> Result<(ObligationId, Option<ObligationRecord>)> {
        let id = self.identifier_at(index).await?;
        let record = self.record(&id).await?;
        Ok((id, record))
    }

    /// Submit the unwrap transaction for a sarcophagus.
    async fn submit_unwrap(
        &self,
        id: &ObligationId,
        key: &DerivedKey,
        material: &[u8],
    ) -> Result<TransactionReceipt>;

    /// Subscribe to live notifications.
    async fn subscribe(&self) -> Result<ObligationEventStream>;
}

/// Content-addressed payload storage.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn fetch(&self, locator: &PayloadLocator) -> Result<Vec<u8>>;
}

/// Decrypts the outer payload layer with an obligation's key.
pub trait PayloadCipher: Send + Sync {
    fn decrypt(&self, key: &DerivedKey, ciphertext: &[u8]) -> Result<Vec<u8>>;
}
