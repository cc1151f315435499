//! Live event reactor.
//!
//! Applies ledger notifications to the shared state in arrival order. Runs
//! for the lifetime of the agent once reconciliation has produced a baseline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use sarco_keys::KeyDeriver;
use sarco_types::{
    window_end, AgentIdentity, FinalizationReason, KeyIndex, ObligationEvent, ObligationId,
    PayloadLocator, StorageFee,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clients::ObligationEventStream;
use crate::error::ArchaeologistError;
use crate::events::ArchaeologistEvent;
use crate::index_cache::KeyIndexCache;
use crate::scheduler::ResurrectionScheduler;
use crate::state::SharedState;

/// What the reactor did with one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactorOutcome {
    /// A new obligation is tracked as awaiting upload.
    Tracked,

    /// A key was bound and the unwrap timer armed.
    Bound { key_index: KeyIndex, armed: bool },

    /// Tracking ended for a finalized obligation.
    Finalized {
        cancelled: bool,
        consumed: Option<KeyIndex>,
    },

    /// Not relevant to this agent.
    Ignored { reason: &'static str },

    /// Contradicts local state; dropped.
    Rejected { reason: String },
}

/// Consumes live ledger notifications.
pub struct EventReactor {
    agent: AgentIdentity,
    state: SharedState,
    scheduler: Arc<ResurrectionScheduler>,
    deriver: Arc<dyn KeyDeriver>,
    index_cache: Option<Arc<dyn KeyIndexCache>>,
    event_tx: broadcast::Sender<ArchaeologistEvent>,
}

impl EventReactor {
    pub fn new(
        agent: AgentIdentity,
        state: SharedState,
        scheduler: Arc<ResurrectionScheduler>,
        deriver: Arc<dyn KeyDeriver>,
        event_tx: broadcast::Sender<ArchaeologistEvent>,
    ) -> Self {
        Self {
            agent,
            state,
            scheduler,
            deriver,
            index_cache: None,
            event_tx,
        }
    }

    /// Write every counter advance back to a cache.
    pub fn with_index_cache(mut self, cache: Arc<dyn KeyIndexCache>) -> Self {
        self.index_cache = Some(cache);
        self
    }

    /// Consume the stream until it ends.
    pub async fn run(self, mut updates: ObligationEventStream) {
        info!(agent = %self.agent, "Event reactor started");
        while let Some(event) = updates.next().await {
            let outcome = self.handle(&event);
            debug!(obligation = %event.obligation_id(), outcome = ?outcome, "Handled ledger event");
        }
        warn!("Ledger event stream ended, reactor stopping");
    }

    /// Apply one notification.
    pub fn handle(&self, event: &ObligationEvent) -> ReactorOutcome {
        match event {
            ObligationEvent::Created {
                id,
                archaeologist,
                resurrection_time,
                resurrection_window,
                storage_fee,
            } => {
                if archaeologist != &self.agent {
                    return ReactorOutcome::Ignored {
                        reason: "assigned to another archaeologist",
                    };
                }
                let window_end = window_end(*resurrection_time, *resurrection_window);
                self.on_created(*id, *resurrection_time, window_end, *storage_fee)
            }
            ObligationEvent::Updated {
                id,
                payload_locator,
                resurrection_time,
            } => self.on_updated(*id, payload_locator, *resurrection_time),
            ObligationEvent::Finalized { id, reason } => self.on_finalized(*id, *reason),
        }
    }

    fn on_created(
        &self,
        id: ObligationId,
        resurrection_time: DateTime<Utc>,
        window_end: DateTime<Utc>,
        storage_fee: StorageFee,
    ) -> ReactorOutcome {
        let mut state = self.state.lock();
        if state.has_seen(&id) {
            return ReactorOutcome::Ignored {
                reason: "already accounted for",
            };
        }
        state.track_pending(id, resurrection_time, window_end, storage_fee);
        drop(state);

        info!(obligation = %id, storage_fee, "Tracking new obligation, awaiting upload");
        ReactorOutcome::Tracked
    }

    fn on_updated(
        &self,
        id: ObligationId,
        payload: &PayloadLocator,
        resurrection_time: DateTime<Utc>,
    ) -> ReactorOutcome {
        if payload.is_empty() {
            warn!(obligation = %id, "Update carries an empty payload locator, dropping");
            return ReactorOutcome::Rejected {
                reason: "empty payload locator".to_string(),
            };
        }

        let (key_index, armed, next_key_index) = {
            let mut state = self.state.lock();
            let had_pending = state.remove_pending(&id).is_some();

            let key_index = match state.bind_payload(&id, payload.clone(), resurrection_time) {
                Ok(key_index) => key_index,
                Err(ArchaeologistError::NotTracked(_)) => {
                    debug!(obligation = %id, had_pending, "Update for untracked obligation");
                    return ReactorOutcome::Ignored {
                        reason: "not tracked",
                    };
                }
                Err(e) => {
                    warn!(obligation = %id, error = %e, "Dropping update");
                    return ReactorOutcome::Rejected {
                        reason: e.to_string(),
                    };
                }
            };

            let armed = self
                .scheduler
                .arm_locked(&mut state, id, resurrection_time, key_index);
            (key_index, armed, state.next_key_index())
        };

        self.record_index(next_key_index);
        let next_public_key = self.deriver.derive(next_key_index).public_key();
        info!(
            obligation = %id,
            key_index = %key_index,
            next_public_key = %next_public_key,
            "Bound key to uploaded obligation"
        );
        let _ = self.event_tx.send(ArchaeologistEvent::KeyBound {
            obligation: id,
            key_index,
            next_public_key,
        });

        ReactorOutcome::Bound { key_index, armed }
    }

    fn on_finalized(&self, id: ObligationId, reason: FinalizationReason) -> ReactorOutcome {
        let (cancelled, consumed, next_key_index) = {
            let mut state = self.state.lock();
            let entry = match state.forget(&id) {
                Some(entry) => entry,
                None => {
                    return ReactorOutcome::Ignored {
                        reason: "not tracked",
                    }
                }
            };
            let cancelled = self.scheduler.cancel_locked(&mut state, &id);

            // Replay counts every finalized obligation as one consumed index
            let consumed = match entry.bound_key {
                Some(_) => None,
                None => Some(state.advance_key_index()),
            };
            (cancelled, consumed, state.next_key_index())
        };

        if consumed.is_some() {
            self.record_index(next_key_index);
        }
        info!(
            obligation = %id,
            reason = %reason,
            cancelled,
            "Obligation finalized"
        );
        let _ = self
            .event_tx
            .send(ArchaeologistEvent::ObligationFinalized { obligation: id, reason });

        ReactorOutcome::Finalized {
            cancelled,
            consumed,
        }
    }

    fn record_index(&self, next_key_index: KeyIndex) {
        if let Some(cache) = &self.index_cache {
            if let Err(e) = cache.store(next_key_index) {
                warn!(next_key_index = %next_key_index, error = %e, "Failed to store key index");
            }
        }
    }
}
