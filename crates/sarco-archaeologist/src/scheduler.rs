//! Resurrection scheduler.
//!
//! Owns one armed timer per obligation awaiting unwrap. A timer fires at
//! `max(now, resurrection_time)`, claims the obligation under the shared
//! lock, and only then talks to storage and the ledger. Arming again
//! replaces the outstanding timer; cancelling removes it without firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sarco_keys::KeyDeriver;
use sarco_types::{KeyIndex, ObligationId, PayloadLocator, TransactionReceipt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::clients::{LedgerClient, PayloadCipher, PayloadStore};
use crate::error::{ArchaeologistError, Result};
use crate::events::ArchaeologistEvent;
use crate::retry::{GaveUp, RetryPolicy};
use crate::state::{ArmedTimer, LedgerState, SharedState};

/// Everything a fired timer needs, captured when it was armed.
#[derive(Debug, Clone)]
struct UnwrapJob {
    obligation: ObligationId,
    key_index: KeyIndex,
    payload: PayloadLocator,
    window_end: DateTime<Utc>,
    generation: u64,
}

/// Arms, replaces, cancels and fires one-shot unwrap timers.
pub struct ResurrectionScheduler {
    state: SharedState,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn PayloadStore>,
    cipher: Arc<dyn PayloadCipher>,
    deriver: Arc<dyn KeyDeriver>,
    retry: RetryPolicy,
    event_tx: broadcast::Sender<ArchaeologistEvent>,
}

impl ResurrectionScheduler {
    pub fn new(
        state: SharedState,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn PayloadStore>,
        cipher: Arc<dyn PayloadCipher>,
        deriver: Arc<dyn KeyDeriver>,
        retry: RetryPolicy,
        event_tx: broadcast::Sender<ArchaeologistEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            ledger,
            store,
            cipher,
            deriver,
            retry,
            event_tx,
        })
    }

    /// Subscribe to scheduler events.
    pub fn subscribe(&self) -> broadcast::Receiver<ArchaeologistEvent> {
        self.event_tx.subscribe()
    }

    /// Arm (or re-arm) the unwrap timer for a tracked obligation.
    ///
    /// Returns `false` without arming if the obligation is untracked, has no
    /// payload, or was already claimed by a firing timer.
    pub fn arm(
        self: &Arc<Self>,
        obligation: ObligationId,
        resurrection_time: DateTime<Utc>,
        key_index: KeyIndex,
    ) -> bool {
        let mut state = self.state.lock();
        self.arm_locked(&mut state, obligation, resurrection_time, key_index)
    }

    /// Arm while the caller already holds the state lock.
    pub(crate) fn arm_locked(
        self: &Arc<Self>,
        state: &mut LedgerState,
        obligation: ObligationId,
        resurrection_time: DateTime<Utc>,
        key_index: KeyIndex,
    ) -> bool {
        let (payload, window_end) = match state.entry(&obligation) {
            Some(entry) => match &entry.payload {
                Some(payload) => (payload.clone(), entry.window_end),
                None => {
                    debug!(obligation = %obligation, "Not arming obligation without payload");
                    return false;
                }
            },
            None => {
                debug!(obligation = %obligation, "Not arming untracked obligation");
                return false;
            }
        };

        let job = UnwrapJob {
            obligation,
            key_index,
            payload,
            window_end,
            generation: state.next_generation(),
        };
        let delay = (resurrection_time - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let scheduler = Arc::clone(self);
        let generation = job.generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(job).await;
        });

        let timer = ArmedTimer {
            resurrection_time,
            key_index,
            generation,
            handle,
        };
        if let Some(previous) = state.replace_timer(obligation, timer) {
            previous.handle.abort();
            debug!(
                obligation = %obligation,
                previous_key_index = %previous.key_index,
                "Replaced armed timer"
            );
        }

        info!(
            obligation = %obligation,
            key_index = %key_index,
            resurrection_time = %resurrection_time,
            delay_secs = delay.as_secs(),
            "Armed unwrap timer"
        );
        let _ = self.event_tx.send(ArchaeologistEvent::TimerArmed {
            obligation,
            key_index,
            resurrection_time,
        });

        true
    }

    /// Cancel an armed timer without firing it.
    pub fn cancel(&self, obligation: &ObligationId) -> bool {
        let mut state = self.state.lock();
        self.cancel_locked(&mut state, obligation)
    }

    pub(crate) fn cancel_locked(&self, state: &mut LedgerState, obligation: &ObligationId) -> bool {
        match state.take_timer(obligation) {
            Some(timer) => {
                timer.handle.abort();
                info!(obligation = %obligation, "Cancelled unwrap timer");
                let _ = self.event_tx.send(ArchaeologistEvent::TimerCancelled {
                    obligation: *obligation,
                });
                true
            }
            None => false,
        }
    }

    /// Abort every armed timer.
    pub fn cancel_all(&self) -> usize {
        let timers = self.state.lock().drain_timers();
        let count = timers.len();
        for timer in timers {
            timer.handle.abort();
        }
        if count > 0 {
            info!(count, "Cancelled all unwrap timers");
        }
        count
    }

    async fn fire(self: Arc<Self>, job: UnwrapJob) {
        {
            let mut state = self.state.lock();
            if state
                .take_timer_if_current(&job.obligation, job.generation)
                .is_none()
            {
                debug!(obligation = %job.obligation, "Stale timer woke up, ignoring");
                return;
            }
            // Claimed: later arm/cancel calls for this obligation are no-ops
            state.forget(&job.obligation);
        }

        if Utc::now() >= job.window_end {
            warn!(
                obligation = %job.obligation,
                window_end = %job.window_end,
                "Resurrection window closed before unwrap"
            );
            let _ = self.event_tx.send(ArchaeologistEvent::UnwrapExpired {
                obligation: job.obligation,
                key_index: job.key_index,
            });
            return;
        }

        match self
            .execute_unwrap(&job.obligation, job.key_index, &job.payload)
            .await
        {
            Ok(receipt) => {
                info!(
                    obligation = %job.obligation,
                    key_index = %job.key_index,
                    tx = %receipt,
                    "Unwrap submitted"
                );
                let _ = self.event_tx.send(ArchaeologistEvent::UnwrapSubmitted {
                    obligation: job.obligation,
                    key_index: job.key_index,
                    receipt,
                });
            }
            Err(e) => {
                error!(
                    obligation = %job.obligation,
                    key_index = %job.key_index,
                    error = %e,
                    "Unwrap failed, dropping obligation"
                );
                let _ = self.event_tx.send(ArchaeologistEvent::UnwrapFailed {
                    obligation: job.obligation,
                    key_index: job.key_index,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Fetch, decrypt and submit the unwrap for one obligation.
    #[instrument(skip_all, fields(obligation = %obligation, key_index = %key_index))]
    pub async fn execute_unwrap(
        &self,
        obligation: &ObligationId,
        key_index: KeyIndex,
        payload: &PayloadLocator,
    ) -> Result<TransactionReceipt> {
        let key = self.deriver.derive(key_index);

        let ciphertext = self
            .retry
            .run("payload fetch", || self.store.fetch(payload))
            .await
            .map_err(|gave_up| exhausted(obligation, "payload fetch", gave_up))?;
        debug!(bytes = ciphertext.len(), "Fetched payload");

        let material = self.cipher.decrypt(&key, &ciphertext)?;

        self.retry
            .run("unwrap submission", || {
                self.ledger.submit_unwrap(obligation, &key, &material)
            })
            .await
            .map_err(|gave_up| exhausted(obligation, "unwrap submission", gave_up))
    }
}

fn exhausted(
    obligation: &ObligationId,
    operation: &'static str,
    gave_up: GaveUp,
) -> ArchaeologistError {
    if !gave_up.error.is_transient() {
        return gave_up.error;
    }
    ArchaeologistError::RetriesExhausted {
        obligation: *obligation,
        operation,
        attempts: gave_up.attempts,
        last_error: gave_up.error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCipher, MockLedger, MockPayloadStore};
    use sarco_keys::{Blake3KeyDeriver, MasterSeed};

    fn scheduler(state: SharedState) -> Arc<ResurrectionScheduler> {
        scheduler_with_ledger(state, Arc::new(MockLedger::new()))
    }

    fn scheduler_with_ledger(
        state: SharedState,
        ledger: Arc<MockLedger>,
    ) -> Arc<ResurrectionScheduler> {
        ResurrectionScheduler::new(
            state,
            ledger,
            Arc::new(MockPayloadStore::new()),
            Arc::new(MockCipher),
            Arc::new(Blake3KeyDeriver::new(MasterSeed::from_bytes([1; 32]))),
            RetryPolicy::default(),
            crate::events::channel(),
        )
    }

    fn id(byte: u8) -> ObligationId {
        ObligationId::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn test_arm_untracked_is_noop() {
        let state = LedgerState::new().into_shared();
        let scheduler = scheduler(state.clone());

        assert!(!scheduler.arm(id(1), Utc::now(), KeyIndex::ZERO));
        assert_eq!(state.lock().armed_count(), 0);
    }

    #[tokio::test]
    async fn test_arm_pending_is_noop() {
        let now = Utc::now();
        let mut ledger_state = LedgerState::new();
        ledger_state.track_pending(id(1), now, now + chrono::Duration::hours(1), 0);
        let state = ledger_state.into_shared();
        let scheduler = scheduler(state.clone());

        assert!(!scheduler.arm(id(1), now, KeyIndex::ZERO));
        assert!(!state.lock().is_armed(&id(1)));
    }

    #[tokio::test]
    async fn test_cancel_removes_timer() {
        let now = Utc::now();
        let mut ledger_state = LedgerState::new();
        let key = ledger_state.track_bound(
            id(2),
            now + chrono::Duration::hours(1),
            now + chrono::Duration::hours(2),
            PayloadLocator::new("arweave://x"),
        );
        let state = ledger_state.into_shared();
        let scheduler = scheduler(state.clone());
        let mut events = scheduler.subscribe();

        assert!(scheduler.arm(id(2), now + chrono::Duration::hours(1), key));
        assert!(scheduler.cancel(&id(2)));
        assert!(!scheduler.cancel(&id(2)));
        assert!(!state.lock().is_armed(&id(2)));

        assert!(matches!(
            events.recv().await.unwrap(),
            ArchaeologistEvent::TimerArmed { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            ArchaeologistEvent::TimerCancelled { obligation: id(2) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_after_window_closed_emits_expired() {
        let now = Utc::now();
        let mut ledger_state = LedgerState::new();
        let key = ledger_state.track_bound(
            id(4),
            now - chrono::Duration::hours(2),
            now - chrono::Duration::hours(1),
            PayloadLocator::new("arweave://late"),
        );
        let state = ledger_state.into_shared();
        let ledger = Arc::new(MockLedger::new());
        let scheduler = scheduler_with_ledger(state.clone(), ledger.clone());
        let mut events = scheduler.subscribe();

        assert!(scheduler.arm(id(4), now - chrono::Duration::hours(2), key));
        assert!(matches!(
            events.recv().await.unwrap(),
            ArchaeologistEvent::TimerArmed { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            ArchaeologistEvent::UnwrapExpired {
                obligation: id(4),
                key_index: key,
            }
        );

        assert_eq!(ledger.submission_count(), 0);
        let state = state.lock();
        assert!(!state.is_tracked(&id(4)));
        assert!(!state.is_armed(&id(4)));
    }

    #[test]
    fn test_exhausted_keeps_permanent_errors() {
        let err = exhausted(
            &id(3),
            "payload fetch",
            GaveUp {
                attempts: 1,
                error: ArchaeologistError::Decrypt("bad".into()),
            },
        );
        assert!(matches!(err, ArchaeologistError::Decrypt(_)));

        let err = exhausted(
            &id(3),
            "payload fetch",
            GaveUp {
                attempts: 4,
                error: ArchaeologistError::Storage("down".into()),
            },
        );
        assert!(matches!(
            err,
            ArchaeologistError::RetriesExhausted { attempts: 4, .. }
        ));
    }
}
