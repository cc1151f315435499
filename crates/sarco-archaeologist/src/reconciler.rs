//! Lifecycle reconciliation.
//!
//! Replays every obligation on the ledger in index order to rebuild the
//! lifecycle map, the pending uploads and the key index counter. No state
//! is persisted between runs: the ledger history alone decides which key
//! index each obligation is bound to.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sarco_keys::KeyDeriver;
use sarco_types::{AgentIdentity, KeyIndex, LifecycleCode, ObligationId, ObligationRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::clients::{LedgerClient, ObligationEventStream};
use crate::error::{ArchaeologistError, Result};
use crate::index_cache::{self, KeyIndexCache};
use crate::retry::RetryPolicy;
use crate::state::LedgerState;

/// Default number of ledger reads in flight during replay
pub const DEFAULT_READ_CONCURRENCY: usize = 8;

/// Counts of how each ledger record was classified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records read from the ledger
    pub total: u64,

    /// Assigned to another archaeologist
    pub foreign: u64,

    /// Finalized; consumed a key index in the past
    pub finalized: u64,

    /// Window elapsed without an upload
    pub expired: u64,

    /// Window elapsed after an upload; consumed a key index
    pub expired_with_payload: u64,

    /// Inside the window, awaiting upload
    pub pending: u64,

    /// Inside the window with a bound key and an unwrap to schedule
    pub armed: u64,

    /// Missing or non-existent records that were dropped
    pub integrity_skipped: u64,

    /// Counter value after replay
    pub next_key_index: KeyIndex,
}

impl ReconcileReport {
    /// Records assigned to this agent.
    pub fn assigned(&self) -> u64 {
        self.finalized + self.expired + self.expired_with_payload + self.pending + self.armed
    }
}

/// Baseline state produced by reconciliation, consumed by `start`.
pub struct InitialState {
    pub state: LedgerState,
    pub report: ReconcileReport,

    /// Live notifications subscribed before replay began
    pub updates: Option<ObligationEventStream>,
}

impl InitialState {
    /// Obligations whose unwrap timer must be armed, ordered by key index.
    pub fn scheduled(&self) -> Vec<(ObligationId, DateTime<Utc>, KeyIndex)> {
        self.state.bound_entries()
    }

    pub fn with_updates(mut self, updates: ObligationEventStream) -> Self {
        self.updates = Some(updates);
        self
    }
}

impl fmt::Debug for InitialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitialState")
            .field("state", &self.state)
            .field("report", &self.report)
            .field("updates", &self.updates.is_some())
            .finish()
    }
}

/// Rebuilds lifecycle state from ledger history.
pub struct LifecycleReconciler {
    ledger: Arc<dyn LedgerClient>,
    deriver: Arc<dyn KeyDeriver>,
    retry: RetryPolicy,
    read_concurrency: usize,
    index_cache: Option<Arc<dyn KeyIndexCache>>,
}

impl LifecycleReconciler {
    pub fn new(ledger: Arc<dyn LedgerClient>, deriver: Arc<dyn KeyDeriver>) -> Self {
        Self {
            ledger,
            deriver,
            retry: RetryPolicy::default(),
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            index_cache: None,
        }
    }

    /// Retry policy for transient read failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_concurrency(mut self, read_concurrency: usize) -> Self {
        self.read_concurrency = read_concurrency.max(1);
        self
    }

    /// Compare the replayed counter with a cached one after replay.
    pub fn with_index_cache(mut self, cache: Arc<dyn KeyIndexCache>) -> Self {
        self.index_cache = Some(cache);
        self
    }

    /// Replay the ledger for `agent` as of now.
    pub async fn reconcile(&self, agent: &AgentIdentity) -> Result<InitialState> {
        self.reconcile_at(agent, Utc::now()).await
    }

    /// Replay the ledger for `agent`, judging windows against `now`.
    #[instrument(skip_all, fields(agent = %agent))]
    pub async fn reconcile_at(
        &self,
        agent: &AgentIdentity,
        now: DateTime<Utc>,
    ) -> Result<InitialState> {
        let count = self
            .retry
            .run("obligation count", || self.ledger.obligation_count())
            .await
            .map_err(|gave_up| gave_up.error)?;

        info!(
            obligation_count = count,
            read_concurrency = self.read_concurrency,
            "Starting lifecycle reconciliation"
        );

        let mut state = LedgerState::new();
        let mut report = ReconcileReport::default();

        // buffered keeps results in ledger-index order
        let mut reads = stream::iter(0..count)
            .map(|index| self.read(index))
            .buffered(self.read_concurrency);

        while let Some(read) = reads.next().await {
            let (index, id, record) = read?;
            report.total += 1;
            classify(&mut state, &mut report, agent, now, index, id, record);
        }

        report.next_key_index = state.next_key_index();

        if let Some(cache) = &self.index_cache {
            index_cache::check_and_record(cache.as_ref(), report.next_key_index)?;
        }

        let current = self.deriver.derive(report.next_key_index);
        debug!(
            next_key_index = %report.next_key_index,
            public_key = %current.public_key(),
            "Current public key"
        );

        info!(
            total = report.total,
            finalized = report.finalized,
            expired = report.expired,
            expired_with_payload = report.expired_with_payload,
            pending = report.pending,
            armed = report.armed,
            integrity_skipped = report.integrity_skipped,
            next_key_index = %report.next_key_index,
            "Lifecycle reconciliation complete"
        );

        Ok(InitialState {
            state,
            report,
            updates: None,
        })
    }

    async fn read(&self, index: u64) -> Result<(u64, ObligationId, Option<ObligationRecord>)> {
        let (id, record) = self
            .retry
            .run("ledger read", || self.ledger.record_at(index))
            .await
            .map_err(|gave_up| {
                if gave_up.error.is_transient() {
                    ArchaeologistError::Ledger(format!(
                        "read of obligation {} failed after {} attempts: {}",
                        index, gave_up.attempts, gave_up.error
                    ))
                } else {
                    gave_up.error
                }
            })?;
        Ok((index, id, record))
    }
}

/// Apply one ledger record to the replay state.
fn classify(
    state: &mut LedgerState,
    report: &mut ReconcileReport,
    agent: &AgentIdentity,
    now: DateTime<Utc>,
    index: u64,
    id: ObligationId,
    record: Option<ObligationRecord>,
) {
    // Buffered creations for this id must not track it again
    state.mark_seen(id);

    let record = match record {
        Some(record) => record,
        None => {
            warn!(index, obligation = %id, "Ledger returned no record, skipping");
            report.integrity_skipped += 1;
            return;
        }
    };

    if record.code == LifecycleCode::NonExistent {
        warn!(index, obligation = %id, "Record has lifecycle code NonExistent, skipping");
        report.integrity_skipped += 1;
        return;
    }

    if !record.is_assigned_to(agent) {
        report.foreign += 1;
        return;
    }

    match record.code {
        LifecycleCode::Finalized => {
            let consumed = state.advance_key_index();
            debug!(obligation = %id, key_index = %consumed, "Finalized obligation");
            report.finalized += 1;
        }
        LifecycleCode::Active if record.is_expired_at(now) => {
            if record.has_payload() {
                let consumed = state.advance_key_index();
                warn!(
                    obligation = %id,
                    key_index = %consumed,
                    window_end = %record.window_end(),
                    "Orphaned obligation: window elapsed after upload"
                );
                report.expired_with_payload += 1;
            } else {
                warn!(
                    obligation = %id,
                    window_end = %record.window_end(),
                    "Orphaned obligation: window elapsed before upload"
                );
                report.expired += 1;
            }
        }
        LifecycleCode::Active if !record.has_payload() => {
            state.track_pending(
                id,
                record.resurrection_time,
                record.window_end(),
                record.storage_fee,
            );
            debug!(obligation = %id, storage_fee = record.storage_fee, "Awaiting upload");
            report.pending += 1;
        }
        LifecycleCode::Active => {
            let key_index = state.track_bound(
                id,
                record.resurrection_time,
                record.window_end(),
                record.payload.clone(),
            );
            debug!(
                obligation = %id,
                key_index = %key_index,
                resurrection_time = %record.resurrection_time,
                "Bound key to active obligation"
            );
            report.armed += 1;
        }
        LifecycleCode::NonExistent => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_cache::InMemoryKeyIndexCache;
    use crate::mock::MockLedger;
    use chrono::Duration;
    use sarco_keys::{Blake3KeyDeriver, MasterSeed};
    use sarco_types::PayloadLocator;

    const AGENT: AgentIdentity = AgentIdentity::from_bytes([0xaa; 20]);
    const OTHER: AgentIdentity = AgentIdentity::from_bytes([0xbb; 20]);

    fn id(byte: u8) -> ObligationId {
        ObligationId::from_bytes([byte; 32])
    }

    fn record(
        code: LifecycleCode,
        archaeologist: AgentIdentity,
        resurrection_time: DateTime<Utc>,
        payload: &str,
    ) -> ObligationRecord {
        ObligationRecord {
            code,
            archaeologist,
            resurrection_time,
            resurrection_window: std::time::Duration::from_secs(3600),
            payload: PayloadLocator::new(payload),
            storage_fee: 10,
        }
    }

    fn reconciler(ledger: MockLedger) -> LifecycleReconciler {
        LifecycleReconciler::new(
            Arc::new(ledger),
            Arc::new(Blake3KeyDeriver::new(MasterSeed::from_bytes([5; 32]))),
        )
        .with_read_concurrency(3)
    }

    #[tokio::test]
    async fn test_finalized_advances_counter() {
        let now = Utc::now();
        let ledger = MockLedger::with_records(vec![(
            id(1),
            record(LifecycleCode::Finalized, AGENT, now - Duration::days(3), "arweave://z"),
        )]);

        let initial = reconciler(ledger).reconcile_at(&AGENT, now).await.unwrap();
        assert_eq!(initial.state.next_key_index(), KeyIndex::new(1));
        assert!(!initial.state.is_tracked(&id(1)));
        assert_eq!(initial.report.finalized, 1);
    }

    #[tokio::test]
    async fn test_expired_orphan_without_payload_is_ignored() {
        let now = Utc::now();
        let ledger = MockLedger::with_records(vec![(
            id(2),
            record(LifecycleCode::Active, AGENT, now - Duration::hours(2), ""),
        )]);

        let initial = reconciler(ledger).reconcile_at(&AGENT, now).await.unwrap();
        assert_eq!(initial.state.next_key_index(), KeyIndex::ZERO);
        assert!(!initial.state.is_tracked(&id(2)));
        assert!(!initial.state.is_pending(&id(2)));
        assert_eq!(initial.report.expired, 1);
    }

    #[tokio::test]
    async fn test_expired_with_payload_consumes_index() {
        let now = Utc::now();
        let ledger = MockLedger::with_records(vec![(
            id(3),
            record(LifecycleCode::Active, AGENT, now - Duration::hours(2), "arweave://y"),
        )]);

        let initial = reconciler(ledger).reconcile_at(&AGENT, now).await.unwrap();
        assert_eq!(initial.state.next_key_index(), KeyIndex::new(1));
        assert!(!initial.state.is_tracked(&id(3)));
        assert_eq!(initial.report.expired_with_payload, 1);
    }

    #[tokio::test]
    async fn test_window_boundary_counts_as_expired() {
        let now = Utc::now();
        let ledger = MockLedger::with_records(vec![(
            id(4),
            record(LifecycleCode::Active, AGENT, now - Duration::hours(1), ""),
        )]);

        let initial = reconciler(ledger).reconcile_at(&AGENT, now).await.unwrap();
        assert_eq!(initial.report.expired, 1);
        assert_eq!(initial.report.pending, 0);
    }

    #[tokio::test]
    async fn test_bindings_follow_ledger_order() {
        let now = Utc::now();
        let later = now + Duration::hours(5);
        let ledger = MockLedger::with_records(vec![
            (id(1), record(LifecycleCode::Active, AGENT, later, "arweave://a")),
            (id(2), record(LifecycleCode::Active, OTHER, later, "arweave://b")),
            (id(3), record(LifecycleCode::Finalized, AGENT, now, "arweave://c")),
            (id(4), record(LifecycleCode::Active, AGENT, later, "")),
            (id(5), record(LifecycleCode::Active, AGENT, later, "arweave://e")),
        ]);

        let initial = reconciler(ledger).reconcile_at(&AGENT, now).await.unwrap();
        let scheduled: Vec<_> = initial
            .scheduled()
            .into_iter()
            .map(|(id, _, key)| (id, key))
            .collect();
        assert_eq!(
            scheduled,
            vec![(id(1), KeyIndex::new(0)), (id(5), KeyIndex::new(2))]
        );
        assert!(initial.state.is_pending(&id(4)));
        assert!(initial.state.is_tracked(&id(4)));
        assert_eq!(initial.report.foreign, 1);
        assert_eq!(initial.report.assigned(), 4);
        assert_eq!(initial.report.next_key_index, KeyIndex::new(3));
    }

    #[tokio::test]
    async fn test_integrity_failures_are_skipped() {
        let now = Utc::now();
        let ledger = MockLedger::new();
        ledger.push_dangling(id(1));
        ledger.push(
            id(2),
            record(LifecycleCode::NonExistent, AGENT, now, "arweave://x"),
        );
        ledger.push(
            id(3),
            record(LifecycleCode::Active, AGENT, now + Duration::hours(1), "arweave://y"),
        );

        let initial = reconciler(ledger).reconcile_at(&AGENT, now).await.unwrap();
        assert_eq!(initial.report.integrity_skipped, 2);
        assert_eq!(initial.state.entry(&id(3)).unwrap().bound_key, Some(KeyIndex::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_read_failures_are_retried() {
        let now = Utc::now();
        let ledger = MockLedger::with_records(vec![(
            id(1),
            record(LifecycleCode::Finalized, AGENT, now, ""),
        )]);
        ledger.fail_next_reads(2);

        let initial = reconciler(ledger).reconcile_at(&AGENT, now).await.unwrap();
        assert_eq!(initial.report.finalized, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reads_abort_reconciliation() {
        let now = Utc::now();
        let ledger = MockLedger::with_records(vec![(
            id(1),
            record(LifecycleCode::Finalized, AGENT, now, ""),
        )]);
        ledger.fail_next_reads(10);

        let result = reconciler(ledger).reconcile_at(&AGENT, now).await;
        assert!(matches!(result, Err(ArchaeologistError::Ledger(_))));
    }

    #[tokio::test]
    async fn test_cache_divergence_is_fatal() {
        let now = Utc::now();
        let ledger = MockLedger::with_records(vec![(
            id(1),
            record(LifecycleCode::Finalized, AGENT, now, ""),
        )]);
        let cache = Arc::new(InMemoryKeyIndexCache::with_value(KeyIndex::new(4)));

        let result = reconciler(ledger)
            .with_index_cache(cache)
            .reconcile_at(&AGENT, now)
            .await;
        assert!(matches!(
            result,
            Err(ArchaeologistError::IndexDivergence { .. })
        ));
    }
}
