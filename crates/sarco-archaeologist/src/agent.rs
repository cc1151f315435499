//! The archaeologist facade.
//!
//! `reconcile` subscribes to live notifications, replays the ledger and
//! returns the baseline. `start` installs that baseline as the shared state,
//! arms the recovered timers and launches the event reactor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sarco_keys::{Blake3KeyDeriver, KeyDeriver, PublicKeyBytes};
use sarco_types::{AgentIdentity, KeyIndex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::clients::{LedgerClient, PayloadCipher, PayloadStore};
use crate::config::ArchaeologistConfig;
use crate::error::{ArchaeologistError, Result};
use crate::events::{self, ArchaeologistEvent};
use crate::index_cache::{FileKeyIndexCache, KeyIndexCache};
use crate::reactor::EventReactor;
use crate::reconciler::{InitialState, LifecycleReconciler, DEFAULT_READ_CONCURRENCY};
use crate::retry::RetryPolicy;
use crate::scheduler::ResurrectionScheduler;
use crate::state::{SharedState, StateSnapshot};
use crate::storage::HttpPayloadStore;

/// An archaeologist bound to one identity and one master seed.
pub struct Archaeologist {
    agent: AgentIdentity,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn PayloadStore>,
    cipher: Arc<dyn PayloadCipher>,
    deriver: Arc<dyn KeyDeriver>,
    unwrap_retry: RetryPolicy,
    read_retry: RetryPolicy,
    read_concurrency: usize,
    index_cache: Option<Arc<dyn KeyIndexCache>>,
    event_tx: broadcast::Sender<ArchaeologistEvent>,
    started: AtomicBool,
}

impl Archaeologist {
    pub fn new(
        agent: AgentIdentity,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn PayloadStore>,
        cipher: Arc<dyn PayloadCipher>,
        deriver: Arc<dyn KeyDeriver>,
    ) -> Self {
        Self {
            agent,
            ledger,
            store,
            cipher,
            deriver,
            unwrap_retry: RetryPolicy::default(),
            read_retry: RetryPolicy::default(),
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            index_cache: None,
            event_tx: events::channel(),
            started: AtomicBool::new(false),
        }
    }

    /// Build from configuration with the HTTP payload store.
    pub fn from_config(
        config: &ArchaeologistConfig,
        ledger: Arc<dyn LedgerClient>,
        cipher: Arc<dyn PayloadCipher>,
    ) -> Result<Self> {
        config.validate()?;
        let deriver = Arc::new(Blake3KeyDeriver::new(config.master_seed()?));
        let store = Arc::new(HttpPayloadStore::from_config(&config.storage)?);

        let mut archaeologist = Self::new(config.agent_identity()?, ledger, store, cipher, deriver)
            .with_unwrap_retry(config.scheduler.retry_policy())
            .with_read_retry(config.reconcile.retry_policy())
            .with_read_concurrency(config.reconcile.read_concurrency);

        if let Some(path) = &config.index_cache_path {
            archaeologist = archaeologist.with_index_cache(Arc::new(FileKeyIndexCache::new(path)));
        }
        Ok(archaeologist)
    }

    pub fn with_unwrap_retry(mut self, retry: RetryPolicy) -> Self {
        self.unwrap_retry = retry;
        self
    }

    pub fn with_read_retry(mut self, retry: RetryPolicy) -> Self {
        self.read_retry = retry;
        self
    }

    pub fn with_read_concurrency(mut self, read_concurrency: usize) -> Self {
        self.read_concurrency = read_concurrency.max(1);
        self
    }

    pub fn with_index_cache(mut self, cache: Arc<dyn KeyIndexCache>) -> Self {
        self.index_cache = Some(cache);
        self
    }

    pub fn agent(&self) -> &AgentIdentity {
        &self.agent
    }

    /// Subscribe to archaeologist events. Subscribe before `start` to see
    /// the timers armed from the baseline.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ArchaeologistEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to live notifications, then replay the ledger.
    #[instrument(skip_all, fields(agent = %self.agent))]
    pub async fn reconcile(&self) -> Result<InitialState> {
        // Events emitted during replay wait in the stream
        let updates = self.ledger.subscribe().await?;

        let mut reconciler = LifecycleReconciler::new(self.ledger.clone(), self.deriver.clone())
            .with_retry(self.read_retry.clone())
            .with_read_concurrency(self.read_concurrency);
        if let Some(cache) = &self.index_cache {
            reconciler = reconciler.with_index_cache(cache.clone());
        }

        Ok(reconciler.reconcile(&self.agent).await?.with_updates(updates))
    }

    /// Install the baseline, arm its timers and launch the reactor.
    ///
    /// Returns as soon as everything is spawned. Must be called from within
    /// a tokio runtime, and only once.
    pub fn start(&self, initial: InitialState) -> Result<ArchaeologistHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ArchaeologistError::AlreadyStarted);
        }

        let InitialState {
            state,
            report,
            updates,
        } = initial;
        let scheduled = state.bound_entries();
        let state = state.into_shared();

        let scheduler = ResurrectionScheduler::new(
            state.clone(),
            self.ledger.clone(),
            self.store.clone(),
            self.cipher.clone(),
            self.deriver.clone(),
            self.unwrap_retry.clone(),
            self.event_tx.clone(),
        );

        let armed = {
            let mut guard = state.lock();
            scheduled
                .into_iter()
                .filter(|(id, resurrection_time, key_index)| {
                    scheduler.arm_locked(&mut guard, *id, *resurrection_time, *key_index)
                })
                .count()
        };

        let reactor = match updates {
            Some(updates) => {
                let mut reactor = EventReactor::new(
                    self.agent,
                    state.clone(),
                    scheduler.clone(),
                    self.deriver.clone(),
                    self.event_tx.clone(),
                );
                if let Some(cache) = &self.index_cache {
                    reactor = reactor.with_index_cache(cache.clone());
                }
                Some(tokio::spawn(reactor.run(updates)))
            }
            None => {
                warn!("No live update stream, running without event reactor");
                None
            }
        };

        info!(
            agent = %self.agent,
            armed,
            pending = report.pending,
            next_key_index = %report.next_key_index,
            "Archaeologist started"
        );

        Ok(ArchaeologistHandle {
            state,
            scheduler,
            deriver: self.deriver.clone(),
            reactor,
        })
    }
}

/// Control over a started archaeologist.
pub struct ArchaeologistHandle {
    state: SharedState,
    scheduler: Arc<ResurrectionScheduler>,
    deriver: Arc<dyn KeyDeriver>,
    reactor: Option<JoinHandle<()>>,
}

impl ArchaeologistHandle {
    /// Public key of the next unbound key index.
    pub fn current_public_key(&self) -> PublicKeyBytes {
        let next = self.next_key_index();
        self.deriver.derive(next).public_key()
    }

    pub fn next_key_index(&self) -> KeyIndex {
        self.state.lock().next_key_index()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.lock().snapshot()
    }

    pub fn scheduler(&self) -> &Arc<ResurrectionScheduler> {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArchaeologistEvent> {
        self.scheduler.subscribe()
    }

    pub fn is_reactor_running(&self) -> bool {
        self.reactor
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop the reactor and abort every armed timer.
    pub fn shutdown(mut self) {
        if let Some(reactor) = self.reactor.take() {
            reactor.abort();
        }
        let cancelled = self.scheduler.cancel_all();
        info!(cancelled, "Archaeologist stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCipher, MockLedger, MockPayloadStore};
    use sarco_keys::MasterSeed;

    fn archaeologist() -> Archaeologist {
        Archaeologist::new(
            AgentIdentity::from_bytes([1; 20]),
            Arc::new(MockLedger::new()),
            Arc::new(MockPayloadStore::new()),
            Arc::new(MockCipher),
            Arc::new(Blake3KeyDeriver::new(MasterSeed::from_bytes([2; 32]))),
        )
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let archaeologist = archaeologist();
        let initial = archaeologist.reconcile().await.unwrap();
        let handle = archaeologist.start(initial).unwrap();
        assert!(handle.is_reactor_running());

        let again = archaeologist.reconcile().await;
        assert!(again.is_err());

        let empty = InitialState {
            state: Default::default(),
            report: Default::default(),
            updates: None,
        };
        assert!(matches!(
            archaeologist.start(empty),
            Err(ArchaeologistError::AlreadyStarted)
        ));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_current_public_key_tracks_counter() {
        let archaeologist = archaeologist();
        let initial = archaeologist.reconcile().await.unwrap();
        let handle = archaeologist.start(initial).unwrap();

        let expected = Blake3KeyDeriver::new(MasterSeed::from_bytes([2; 32]))
            .derive(KeyIndex::ZERO)
            .public_key();
        assert_eq!(handle.current_public_key(), expected);
        handle.shutdown();
    }
}
