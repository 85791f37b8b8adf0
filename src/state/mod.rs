pub mod overlay;
pub mod points;
pub mod race;
pub mod sequence;
mod sse;
pub mod status;
pub mod totals;

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{Mutex, RwLock, watch};

use crate::{
    config::{AppConfig, PhaseSettings},
    dao::{race::RaceRepository, store::KvStore},
    error::ServiceError,
    state::{points::MatrixCache, race::Phase},
};

pub use self::sse::SseHub;
use self::sse::SseState;

pub type SharedState = Arc<AppState>;

/// Central application state: store handle, configuration, caches and SSE hubs.
pub struct AppState {
    store: RwLock<Option<Arc<dyn KvStore>>>,
    config: AppConfig,
    sse: SseState,
    matrices: MatrixCache,
    finalizing: DashMap<Phase, ()>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            config,
            sse: SseState::new(),
            matrices: MatrixCache::new(),
            finalizing: DashMap::new(),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn KvStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] while none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn KvStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Typed repository over the current store.
    pub async fn repository(&self) -> Result<RaceRepository, ServiceError> {
        self.require_store().await.map(RaceRepository::new)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn KvStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update the degraded flag, notifying watchers only when it changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Settings of `phase`.
    pub fn phase(&self, phase: Phase) -> &PhaseSettings {
        self.config.phase(phase)
    }

    /// Per-phase points matrix cache.
    pub fn matrices(&self) -> &MatrixCache {
        &self.matrices
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        self.sse.public()
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        self.sse.admin()
    }

    /// Token guard that ensures a single admin SSE subscriber at a time.
    pub fn admin_token(&self) -> &Mutex<Option<String>> {
        self.sse.admin_token()
    }

    /// Mark a finalization of `phase` as in flight, `None` when one already is.
    pub fn try_begin_finalize(&self, phase: Phase) -> Option<FinalizeGuard<'_>> {
        match self.finalizing.entry(phase) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(FinalizeGuard {
                    finalizing: &self.finalizing,
                    phase,
                })
            }
        }
    }
}

/// In-flight marker of a finalization, released on drop.
pub struct FinalizeGuard<'a> {
    finalizing: &'a DashMap<Phase, ()>,
    phase: Phase,
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        self.finalizing.remove(&self.phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::store::memory::MemoryStore;

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());
        assert!(matches!(
            state.repository().await,
            Err(ServiceError::Degraded)
        ));

        state.set_store(Arc::new(MemoryStore::new())).await;
        assert!(!state.is_degraded());
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());

        state.clear_store().await;
        assert!(state.is_degraded());
    }

    #[test]
    fn finalize_guard_is_exclusive_per_phase() {
        let state = AppState::new(AppConfig::default());
        let guard = state.try_begin_finalize(Phase::A);
        assert!(guard.is_some());
        assert!(state.try_begin_finalize(Phase::A).is_none());
        assert!(state.try_begin_finalize(Phase::B).is_some());

        drop(guard);
        assert!(state.try_begin_finalize(Phase::A).is_some());
    }
}
