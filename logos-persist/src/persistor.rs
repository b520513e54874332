//! The persistor: wires a [`Store`] to a [`Storage`] backend.
//!
//! Architecture:
//! ```text
//!   Store::dispatch ──► listener ──► on_change (sync)
//!                                      │ detect_changes (Arc identity, filter)
//!                                      ▼
//!                                 WriteQueue ──► drain task (tokio interval)
//!                                                  │ one key in flight
//!                                                  ▼
//!                       store.get_state()[key] ─► outbound ─► serialize ─► set_item
//! ```
//!
//! Control surface: pause/resume the detection path, ad-hoc rehydrate,
//! purge, restore, and waiting for the write queue to drain.

use futures_util::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

use crate::config::{PersistConfig, Settings};
use crate::detect::detect_changes;
use crate::error::{PersistError, PersistResult};
use crate::restore::restore_with;
use crate::scheduler::{KeyWriter, Scheduler, SchedulerState};
use crate::shape::{MapShape, StateShape};
use crate::storage::Storage;
use crate::store::{Action, Store, SubscriptionId};

/// Options for [`Persistor::rehydrate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RehydrateOptions {
    /// Incoming values are stored payloads: deserialize and run inbound
    /// transforms before dispatching.
    pub serial: bool,
}

/// Handle to a running persistor. Cloning shares the same engine.
pub struct Persistor<St, S = MapShape>
where
    St: Store,
    S: StateShape<State = St::State>,
{
    inner: Arc<Inner<St, S>>,
}

impl<St, S> Clone for Persistor<St, S>
where
    St: Store,
    S: StateShape<State = St::State>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<St, S>
where
    St: Store,
    S: StateShape<State = St::State>,
{
    store: Arc<St>,
    storage: Arc<dyn Storage>,
    settings: Settings<S>,
    scheduler: Arc<Scheduler>,
    /// Snapshot seen by the previous detection pass. Starts as the store's
    /// state at construction, so only later changes are written.
    last_state: Mutex<S::State>,
    paused: AtomicBool,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl<St, S> Persistor<St, S>
where
    St: Store,
    S: StateShape<State = St::State>,
{
    /// Subscribe to `store` and start persisting its changes into `storage`.
    ///
    /// Must be called within a tokio runtime; the handle is kept to schedule
    /// writes from store listeners running on any thread.
    pub fn new(
        store: Arc<St>,
        storage: Arc<dyn Storage>,
        config: PersistConfig<S>,
    ) -> PersistResult<Self> {
        let runtime = Handle::try_current().map_err(|_| PersistError::NoRuntime)?;
        let settings = config.settings();
        let scheduler = Arc::new(Scheduler::new(settings.interval, runtime));

        let inner = Arc::new(Inner {
            last_state: Mutex::new(store.get_state()),
            store: Arc::clone(&store),
            storage,
            settings,
            scheduler,
            paused: AtomicBool::new(false),
            subscription: Mutex::new(None),
        });

        let weak: Weak<Inner<St, S>> = Arc::downgrade(&inner);
        let id = store.subscribe(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_change();
            }
        }));
        *inner.subscription.lock() = Some(id);

        log::info!(
            "Persisting store under prefix `{}` (interval {:?})",
            inner.settings.prefix,
            inner.settings.interval
        );
        Ok(Self { inner })
    }

    /// Ignore change notifications until [`resume`](Self::resume). Queued and
    /// in-flight writes keep draining.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Keys waiting to be written.
    pub fn pending(&self) -> usize {
        self.inner.scheduler.queue().lock().dirty().len()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.queue().lock().state()
    }

    /// Resolves once every queued key has been written (or failed) and the
    /// scheduler is idle.
    pub async fn flushed(&self) {
        let mut rx = self.inner.scheduler.subscribe();
        // The sender lives as long as the scheduler, which `self` keeps alive.
        let _ = rx.wait_for(|state| *state == SchedulerState::Idle).await;
    }

    /// Dispatch `incoming` into the store as a rehydrate action.
    ///
    /// With `serial`, each key is treated as a stored payload: decoded and
    /// inbound-transformed first. Keys that fail are logged and left out.
    /// Serial rehydration only supports synchronous transforms and fails
    /// before touching any key otherwise.
    pub fn rehydrate(
        &self,
        incoming: S::State,
        options: RehydrateOptions,
    ) -> PersistResult<S::State> {
        let settings = &self.inner.settings;
        let state = if options.serial {
            if settings.pipeline.is_async() {
                return Err(PersistError::Configuration(
                    "serial rehydrate does not support asynchronous transforms".into(),
                ));
            }
            let mut state = settings.shape.init();
            settings.shape.for_each(&incoming, &mut |key, stored| {
                let decoded = settings
                    .codec
                    .deserialize(Value::clone(stored))
                    .map_err(PersistError::from)
                    .and_then(|data| settings.pipeline.inbound_sync(data, key));
                match decoded {
                    Ok(value) => settings.shape.set(&mut state, key, Arc::new(value)),
                    Err(e) => log::warn!("Error rehydrating data for key `{key}`: {e}"),
                }
            });
            state
        } else {
            incoming
        };

        self.inner.store.dispatch(Action::Rehydrate(state.clone()));
        Ok(state)
    }

    /// Remove persisted entries of this namespace.
    ///
    /// `None` removes every stored key under the prefix; `Some(keys)` removes
    /// just those. Either way keys rejected by the whitelist/blacklist are
    /// left alone. Every removal is attempted; the first backend error is
    /// returned. Returns the logical keys removed.
    pub async fn purge(&self, keys: Option<&[&str]>) -> PersistResult<Vec<String>> {
        let settings = &self.inner.settings;
        let targets: Vec<String> = match keys {
            Some(keys) => keys
                .iter()
                .filter(|k| settings.filter.allows(k))
                .map(|k| k.to_string())
                .collect(),
            None => self
                .inner
                .storage
                .get_all_keys()
                .await?
                .iter()
                .filter_map(|k| settings.logical_key(k))
                .filter(|k| settings.filter.allows(k))
                .map(str::to_string)
                .collect(),
        };

        let storage = &self.inner.storage;
        let results = join_all(targets.iter().map(|key| async move {
            let storage_key = settings.storage_key(key);
            storage.remove_item(&storage_key).await
        }))
        .await;

        let mut first_error = None;
        for (key, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                log::warn!("Failed to purge key `{key}`: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => {
                log::info!("Purged {} keys under prefix `{}`", targets.len(), settings.prefix);
                Ok(targets)
            }
        }
    }

    /// Read this namespace back from storage. The store is not touched.
    pub async fn restore(&self) -> PersistResult<S::State> {
        restore_with(&self.inner.settings, self.inner.storage.as_ref()).await
    }

    /// Stop observing the store. Pending writes still drain.
    pub fn detach(&self) {
        if let Some(id) = self.inner.subscription.lock().take() {
            self.inner.store.unsubscribe(id);
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }
}

impl<St, S> Inner<St, S>
where
    St: Store,
    S: StateShape<State = St::State>,
{
    /// Record the subtrees a rehydrate dispatched as already observed. Keys
    /// outside `dispatched` keep their previous baseline, so changes made
    /// while detection was paused are still picked up.
    fn observe_dispatched(&self, dispatched: &S::State) {
        let shape = &self.settings.shape;
        let mut last = self.last_state.lock();
        shape.for_each(dispatched, &mut |key, value| {
            shape.set(&mut last, key, Arc::clone(value));
        });
    }

    fn on_change(self: Arc<Self>) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }

        let start = {
            let mut last = self.last_state.lock();
            let current = self.store.get_state();
            let mut queue = self.scheduler.queue().lock();
            let queued = detect_changes(
                &self.settings.shape,
                &self.settings.filter,
                &last,
                &current,
                queue.dirty_mut(),
            );
            if queued > 0 {
                log::trace!("{queued} keys marked dirty, {} pending", queue.dirty().len());
            }
            *last = current;
            queue.begin()
        };

        if start {
            let scheduler = Arc::clone(&self.scheduler);
            let writer: Arc<dyn KeyWriter> = self;
            scheduler.spawn_drain(writer);
        }
    }
}

impl<St, S> KeyWriter for Inner<St, S>
where
    St: Store,
    S: StateShape<State = St::State>,
{
    fn write<'a>(&'a self, key: &'a str) -> BoxFuture<'a, PersistResult<()>> {
        Box::pin(async move {
            // Read at drain time so the latest value wins.
            let current = self.settings.shape.get(&self.store.get_state(), key);
            let Some(current) = current else {
                log::debug!("Key `{key}` no longer in state, skipping write");
                return Ok(());
            };
            let value = self
                .settings
                .pipeline
                .outbound(Value::clone(&current), key)
                .await?;
            let encoded = self.settings.codec.serialize(&value)?;
            let storage_key = self.settings.storage_key(key);
            self.storage.set_item(&storage_key, encoded).await?;
            log::trace!("Persisted key `{key}`");
            Ok(())
        })
    }
}

/// Startup bootstrap: restore the namespace, merge it into the store, then
/// start persisting.
///
/// Detection is paused while the rehydrate action is reduced, so restored
/// values are not immediately queued for rewriting. Other keys that changed
/// during the restore are queued on resume. Returns the persistor and the
/// restored snapshot.
pub async fn persist_store<St, S>(
    store: Arc<St>,
    storage: Arc<dyn Storage>,
    config: PersistConfig<S>,
) -> PersistResult<(Persistor<St, S>, S::State)>
where
    St: Store,
    S: StateShape<State = St::State>,
{
    let persistor = Persistor::new(store, storage, config)?;
    persistor.pause();

    let restored = match persistor.restore().await {
        Ok(restored) => restored,
        Err(e) => {
            log::error!("Restore failed, not persisting: {e}");
            persistor.detach();
            return Err(e);
        }
    };
    let dispatched = persistor.rehydrate(restored.clone(), RehydrateOptions::default())?;
    // Restored values came from storage; don't write them straight back.
    persistor.inner.observe_dispatched(&dispatched);
    persistor.resume();
    // Catch keys dispatched by others while the restore was running.
    Arc::clone(&persistor.inner).on_change();

    Ok((persistor, restored))
}
