//! In-memory collaborators for development and testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use sarco_keys::{DerivedKey, PublicKeyBytes};
use sarco_types::{
    KeyIndex, ObligationEvent, ObligationId, ObligationRecord, PayloadLocator, TransactionReceipt,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::clients::{LedgerClient, ObligationEventStream, PayloadCipher, PayloadStore};
use crate::error::{ArchaeologistError, Result};

/// An unwrap transaction recorded by [`MockLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrapSubmission {
    pub obligation: ObligationId,
    pub key_index: KeyIndex,
    pub public_key: PublicKeyBytes,
    pub material: Vec<u8>,
}

/// Decrements a failure budget, returning whether a failure should be injected.
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Mock ledger holding records in ledger-index order.
pub struct MockLedger {
    order: RwLock<Vec<ObligationId>>,
    records: RwLock<HashMap<ObligationId, ObligationRecord>>,
    submissions: Mutex<Vec<UnwrapSubmission>>,
    read_failures: AtomicU32,
    submit_failures: AtomicU32,
    unavailable: AtomicBool,
    event_tx: mpsc::UnboundedSender<ObligationEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ObligationEvent>>>,
}

impl MockLedger {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            order: RwLock::new(Vec::new()),
            records: RwLock::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            read_failures: AtomicU32::new(0),
            submit_failures: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Create a ledger pre-populated with records in index order.
    pub fn with_records(records: Vec<(ObligationId, ObligationRecord)>) -> Self {
        let ledger = Self::new();
        for (id, record) in records {
            ledger.push(id, record);
        }
        ledger
    }

    /// Append a record at the next ledger index.
    pub fn push(&self, id: ObligationId, record: ObligationRecord) {
        self.order.write().push(id);
        self.records.write().insert(id, record);
    }

    /// Append an identifier whose record lookup returns nothing.
    pub fn push_dangling(&self, id: ObligationId) {
        self.order.write().push(id);
    }

    /// Queue a live notification.
    pub fn emit(&self, event: ObligationEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Fail the next `n` record reads with a transient error.
    pub fn fail_next_reads(&self, n: u32) {
        self.read_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` unwrap submissions with a transient error.
    pub fn fail_next_submissions(&self, n: u32) {
        self.submit_failures.store(n, Ordering::SeqCst);
    }

    /// Make every call fail as if the node were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<UnwrapSubmission> {
        self.submissions.lock().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArchaeologistError::Ledger("node unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn obligation_count(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.order.read().len() as u64)
    }

    async fn identifier_at(&self, index: u64) -> Result<ObligationId> {
        self.check_available()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.order.read().get(i).copied())
            .ok_or_else(|| ArchaeologistError::Ledger(format!("no obligation at index {}", index)))
    }

    async fn record(&self, id: &ObligationId) -> Result<Option<ObligationRecord>> {
        self.check_available()?;
        if take_failure(&self.read_failures) {
            return Err(ArchaeologistError::Ledger("read timed out".to_string()));
        }
        Ok(self.records.read().get(id).cloned())
    }

    async fn submit_unwrap(
        &self,
        id: &ObligationId,
        key: &DerivedKey,
        material: &[u8],
    ) -> Result<TransactionReceipt> {
        self.check_available()?;
        if take_failure(&self.submit_failures) {
            return Err(ArchaeologistError::Submission("transaction underpriced".to_string()));
        }

        let mut submissions = self.submissions.lock();
        submissions.push(UnwrapSubmission {
            obligation: *id,
            key_index: key.index(),
            public_key: key.public_key(),
            material: material.to_vec(),
        });
        Ok(TransactionReceipt::new(format!("0x{:064x}", submissions.len())))
    }

    async fn subscribe(&self) -> Result<ObligationEventStream> {
        self.check_available()?;
        let rx = self
            .event_rx
            .lock()
            .take()
            .ok_or_else(|| ArchaeologistError::Ledger("already subscribed".to_string()))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Mock payload store keyed by locator.
#[derive(Default)]
pub struct MockPayloadStore {
    payloads: RwLock<HashMap<PayloadLocator, Vec<u8>>>,
    fetch_failures: AtomicU32,
}

impl MockPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: PayloadLocator, payload: impl Into<Vec<u8>>) {
        self.payloads.write().insert(locator, payload.into());
    }

    /// Fail the next `n` fetches with a transient error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PayloadStore for MockPayloadStore {
    async fn fetch(&self, locator: &PayloadLocator) -> Result<Vec<u8>> {
        if take_failure(&self.fetch_failures) {
            return Err(ArchaeologistError::Storage("gateway timeout".to_string()));
        }
        self.payloads
            .read()
            .get(locator)
            .cloned()
            .ok_or_else(|| ArchaeologistError::Storage(format!("{} not found", locator)))
    }
}

/// Cipher that passes payloads through and rejects empty ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockCipher;

impl PayloadCipher for MockCipher {
    fn decrypt(&self, _key: &DerivedKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(ArchaeologistError::Decrypt("empty payload".to_string()));
        }
        Ok(ciphertext.to_vec())
    }
}
