//! State container interface and an in-memory reference container.
//!
//! The persistor observes a [`Store`]: it subscribes for change
//! notifications, reads snapshots, and dispatches [`Action::Rehydrate`] when
//! restored state should be merged back in.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::shape::{StateMap, SubState};

/// Change listener. Called synchronously after every dispatch.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Events a store reduces.
#[derive(Debug, Clone)]
pub enum Action<T> {
    /// Merge restored state: every key in the payload replaces the live value.
    Rehydrate(T),
    /// Replace one top-level subtree.
    Set { key: String, value: SubState },
    /// Drop one top-level subtree.
    Remove { key: String },
}

/// Observable mutable state container.
pub trait Store: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;

    fn get_state(&self) -> Self::State;

    fn subscribe(&self, listener: Listener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    fn dispatch(&self, action: Action<Self::State>);
}

/// In-memory [`Store`] over a [`StateMap`].
pub struct MemoryStore {
    state: RwLock<StateMap>,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
    rehydrations: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StateMap::new())
    }
}

impl MemoryStore {
    pub fn new(initial: StateMap) -> Self {
        Self {
            state: RwLock::new(initial),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            rehydrations: AtomicU64::new(0),
        }
    }

    /// Shorthand for dispatching [`Action::Set`].
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.dispatch(Action::Set {
            key: key.into(),
            value: Arc::new(value),
        });
    }

    pub fn get(&self, key: &str) -> Option<SubState> {
        self.state.read().get(key).cloned()
    }

    /// Number of rehydrate actions reduced so far.
    pub fn rehydrations(&self) -> u64 {
        self.rehydrations.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn reduce(&self, action: Action<StateMap>) {
        let mut state = self.state.write();
        match action {
            Action::Rehydrate(payload) => {
                self.rehydrations.fetch_add(1, Ordering::Relaxed);
                for (key, value) in payload {
                    state.insert(key, value);
                }
            }
            Action::Set { key, value } => {
                state.insert(key, value);
            }
            Action::Remove { key } => {
                state.remove(&key);
            }
        }
    }
}

impl Store for MemoryStore {
    type State = StateMap;

    fn get_state(&self) -> StateMap {
        self.state.read().clone()
    }

    fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.write().retain(|(sub, _)| *sub != id);
    }

    fn dispatch(&self, action: Action<StateMap>) {
        self.reduce(action);

        // Listeners may read state, so notify outside both locks.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }
}
