//! In-memory lifecycle state.
//!
//! The lifecycle map, the pending-upload map, the key index counter and the
//! armed timers live in one [`LedgerState`] behind one mutex. Every
//! read-modify-write on them happens inside a single critical section, and
//! no lock is held across an await point.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sarco_types::{KeyIndex, ObligationId, PayloadLocator, StorageFee};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{ArchaeologistError, Result};

/// State shared by the scheduler and the event reactor.
pub type SharedState = Arc<Mutex<LedgerState>>;

/// A tracked obligation assigned to this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEntry {
    /// Earliest release time
    pub resurrection_time: DateTime<Utc>,

    /// Release is no longer accepted from this instant on
    pub window_end: DateTime<Utc>,

    /// Payload locator once uploaded
    pub payload: Option<PayloadLocator>,

    /// Key index bound when the payload became known
    pub bound_key: Option<KeyIndex>,
}

impl LifecycleEntry {
    pub fn awaiting_upload(resurrection_time: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            resurrection_time,
            window_end,
            payload: None,
            bound_key: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound_key.is_some()
    }
}

/// A one-shot unwrap waiting for its resurrection time.
#[derive(Debug)]
pub(crate) struct ArmedTimer {
    pub resurrection_time: DateTime<Utc>,
    pub key_index: KeyIndex,
    pub generation: u64,
    pub handle: JoinHandle<()>,
}

/// Public view of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedSummary {
    pub resurrection_time: DateTime<Utc>,
    pub key_index: KeyIndex,
}

/// Read-only copy of the shared state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub lifecycle: HashMap<ObligationId, LifecycleEntry>,
    pub pending: HashMap<ObligationId, StorageFee>,
    pub next_key_index: KeyIndex,
    pub armed: HashMap<ObligationId, ArmedSummary>,
}

/// Lifecycle map, pending uploads, key counter and armed timers.
#[derive(Debug, Default)]
pub struct LedgerState {
    lifecycle: HashMap<ObligationId, LifecycleEntry>,
    pending: HashMap<ObligationId, StorageFee>,
    next_key_index: KeyIndex,
    armed: HashMap<ObligationId, ArmedTimer>,
    next_generation: u64,

    // Every obligation replay or a live creation has already accounted for
    seen: HashSet<ObligationId>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Key index the next binding will receive.
    pub fn next_key_index(&self) -> KeyIndex {
        self.next_key_index
    }

    /// Consume one key index without binding it to a tracked entry.
    ///
    /// Used for obligations that consumed an index in the past.
    pub fn advance_key_index(&mut self) -> KeyIndex {
        let consumed = self.next_key_index;
        self.next_key_index = consumed.next();
        consumed
    }

    /// Record that an obligation has been accounted for.
    ///
    /// Returns `false` if it already was.
    pub fn mark_seen(&mut self, id: ObligationId) -> bool {
        self.seen.insert(id)
    }

    pub fn has_seen(&self, id: &ObligationId) -> bool {
        self.seen.contains(id)
    }

    /// Track an obligation whose payload has not been uploaded yet.
    pub fn track_pending(
        &mut self,
        id: ObligationId,
        resurrection_time: DateTime<Utc>,
        window_end: DateTime<Utc>,
        storage_fee: StorageFee,
    ) {
        self.seen.insert(id);
        self.lifecycle
            .insert(id, LifecycleEntry::awaiting_upload(resurrection_time, window_end));
        self.pending.insert(id, storage_fee);
    }

    /// Track an obligation with a known payload and bind the next key index to it.
    pub fn track_bound(
        &mut self,
        id: ObligationId,
        resurrection_time: DateTime<Utc>,
        window_end: DateTime<Utc>,
        payload: PayloadLocator,
    ) -> KeyIndex {
        let key_index = self.advance_key_index();
        self.seen.insert(id);
        self.pending.remove(&id);
        self.lifecycle.insert(
            id,
            LifecycleEntry {
                resurrection_time,
                window_end,
                payload: Some(payload),
                bound_key: Some(key_index),
            },
        );
        key_index
    }

    /// Record an uploaded payload for a tracked obligation and bind the next key index.
    ///
    /// Fails without touching the counter if the obligation is untracked or
    /// already has a key.
    pub fn bind_payload(
        &mut self,
        id: &ObligationId,
        payload: PayloadLocator,
        resurrection_time: DateTime<Utc>,
    ) -> Result<KeyIndex> {
        let entry = self
            .lifecycle
            .get(id)
            .ok_or(ArchaeologistError::NotTracked(*id))?;

        if let Some(bound) = entry.bound_key {
            return Err(ArchaeologistError::consistency(format!(
                "{} already bound to key index {}",
                id, bound
            )));
        }

        let key_index = self.advance_key_index();
        if let Some(entry) = self.lifecycle.get_mut(id) {
            // The window keeps its length when the resurrection time moves
            let window = entry.window_end - entry.resurrection_time;
            entry.window_end = resurrection_time
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            entry.payload = Some(payload);
            entry.resurrection_time = resurrection_time;
            entry.bound_key = Some(key_index);
        }
        self.pending.remove(id);
        Ok(key_index)
    }

    /// Stop tracking an obligation. Returns its entry if it was tracked.
    pub fn forget(&mut self, id: &ObligationId) -> Option<LifecycleEntry> {
        self.pending.remove(id);
        self.lifecycle.remove(id)
    }

    pub fn remove_pending(&mut self, id: &ObligationId) -> Option<StorageFee> {
        self.pending.remove(id)
    }

    pub fn entry(&self, id: &ObligationId) -> Option<&LifecycleEntry> {
        self.lifecycle.get(id)
    }

    pub fn is_tracked(&self, id: &ObligationId) -> bool {
        self.lifecycle.contains_key(id)
    }

    pub fn is_pending(&self, id: &ObligationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn is_armed(&self, id: &ObligationId) -> bool {
        self.armed.contains_key(id)
    }

    pub fn tracked_count(&self) -> usize {
        self.lifecycle.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Tracked obligations that have a bound key and a payload, ordered by key index.
    pub fn bound_entries(&self) -> Vec<(ObligationId, DateTime<Utc>, KeyIndex)> {
        let mut bound: Vec<_> = self
            .lifecycle
            .iter()
            .filter(|(_, entry)| entry.payload.is_some())
            .filter_map(|(id, entry)| {
                entry
                    .bound_key
                    .map(|key_index| (*id, entry.resurrection_time, key_index))
            })
            .collect();
        bound.sort_by_key(|(_, _, key_index)| *key_index);
        bound
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            lifecycle: self.lifecycle.clone(),
            pending: self.pending.clone(),
            next_key_index: self.next_key_index,
            armed: self
                .armed
                .iter()
                .map(|(id, timer)| {
                    (
                        *id,
                        ArmedSummary {
                            resurrection_time: timer.resurrection_time,
                            key_index: timer.key_index,
                        },
                    )
                })
                .collect(),
        }
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub(crate) fn replace_timer(
        &mut self,
        id: ObligationId,
        timer: ArmedTimer,
    ) -> Option<ArmedTimer> {
        self.armed.insert(id, timer)
    }

    pub(crate) fn take_timer(&mut self, id: &ObligationId) -> Option<ArmedTimer> {
        self.armed.remove(id)
    }

    /// Remove the armed timer only if it is still the given generation.
    pub(crate) fn take_timer_if_current(
        &mut self,
        id: &ObligationId,
        generation: u64,
    ) -> Option<ArmedTimer> {
        match self.armed.get(id) {
            Some(timer) if timer.generation == generation => self.armed.remove(id),
            _ => None,
        }
    }

    pub(crate) fn drain_timers(&mut self) -> Vec<ArmedTimer> {
        self.armed.drain().map(|(_, timer)| timer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObligationId {
        ObligationId::from_bytes([byte; 32])
    }

    #[test]
    fn test_track_pending_then_bind() {
        let now = Utc::now();
        let mut state = LedgerState::new();
        state.track_pending(id(1), now, now, 7);
        assert!(state.is_pending(&id(1)));
        assert!(!state.entry(&id(1)).unwrap().is_bound());

        let key = state
            .bind_payload(&id(1), PayloadLocator::new("arweave://abc"), now)
            .unwrap();
        assert_eq!(key, KeyIndex::ZERO);
        assert_eq!(state.next_key_index(), KeyIndex::new(1));
        assert!(!state.is_pending(&id(1)));
        assert_eq!(state.entry(&id(1)).unwrap().bound_key, Some(KeyIndex::ZERO));
    }

    #[test]
    fn test_bind_twice_is_rejected_without_advancing() {
        let now = Utc::now();
        let mut state = LedgerState::new();
        state.track_bound(id(1), now, now, PayloadLocator::new("a"));

        let err = state
            .bind_payload(&id(1), PayloadLocator::new("b"), now)
            .unwrap_err();
        assert!(matches!(err, ArchaeologistError::Consistency(_)));
        assert_eq!(state.next_key_index(), KeyIndex::new(1));
    }

    #[test]
    fn test_bind_untracked_is_rejected() {
        let mut state = LedgerState::new();
        let err = state
            .bind_payload(&id(9), PayloadLocator::new("a"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ArchaeologistError::NotTracked(_)));
        assert_eq!(state.next_key_index(), KeyIndex::ZERO);
    }

    #[test]
    fn test_rebind_moves_window_with_resurrection_time() {
        let now = Utc::now();
        let mut state = LedgerState::new();
        state.track_pending(
            id(5),
            now + chrono::Duration::minutes(10),
            now + chrono::Duration::minutes(20),
            1,
        );

        let later = now + chrono::Duration::hours(2);
        state
            .bind_payload(&id(5), PayloadLocator::new("arweave://e"), later)
            .unwrap();

        let entry = state.entry(&id(5)).unwrap();
        assert_eq!(entry.resurrection_time, later);
        assert_eq!(entry.window_end, later + chrono::Duration::minutes(10));
    }

    #[test]
    fn test_seen_outlives_forget() {
        let now = Utc::now();
        let mut state = LedgerState::new();
        assert!(state.mark_seen(id(6)));
        assert!(!state.mark_seen(id(6)));

        state.track_pending(id(7), now, now, 1);
        assert!(state.has_seen(&id(7)));
        state.forget(&id(7));
        assert!(state.has_seen(&id(7)));
        assert!(!state.has_seen(&id(8)));
    }

    #[test]
    fn test_forget_clears_pending() {
        let now = Utc::now();
        let mut state = LedgerState::new();
        state.track_pending(id(2), now, now, 1);
        assert!(state.forget(&id(2)).is_some());
        assert!(!state.is_pending(&id(2)));
        assert!(!state.is_tracked(&id(2)));
    }

    #[test]
    fn test_bound_entries_sorted_by_key() {
        let now = Utc::now();
        let mut state = LedgerState::new();
        state.track_bound(id(3), now, now, PayloadLocator::new("c"));
        state.track_pending(id(4), now, now, 1);
        state.track_bound(id(1), now, now, PayloadLocator::new("a"));

        let keys: Vec<_> = state.bound_entries().into_iter().map(|(i, _, k)| (i, k)).collect();
        assert_eq!(
            keys,
            vec![(id(3), KeyIndex::new(0)), (id(1), KeyIndex::new(1))]
        );
    }
}
