//! # logos-persist — State persistence and rehydration for Logos
//!
//! Persists selected top-level subtrees of an observable state container
//! into a key-value backend, and restores them on startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  dispatch   ┌──────────────┐  dirty keys  ┌─────────────┐
//! │ Store       │ ──────────► │ ChangeDetect │ ───────────► │ WriteQueue  │
//! │ (container) │  listener   │ (Arc ident.) │   (FIFO)     │ Idle/Drain  │
//! └──────▲──────┘             └──────────────┘              └──────┬──────┘
//!        │                                                         │ 1 in flight
//!        │ Action::Rehydrate                                       ▼
//! ┌──────┴──────┐  inbound    ┌──────────────┐  outbound    ┌─────────────┐
//! │ restore     │ ◄────────── │ Pipeline +   │ ◄─────────── │ dyn Storage │
//! │ (fan-out)   │  (reverse)  │ Serializer   │ ───────────► │ Memory/Rocks│
//! └─────────────┘             └──────────────┘              └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`persistor`] — `Persistor` handle, control surface, `persist_store`
//! - [`scheduler`] — debounced single-flight write queue
//! - [`detect`] — per-key identity change detection
//! - [`restore`] — `get_stored_state` rehydration engine
//! - [`transform`] — ordered sync/async transform pipeline
//! - [`serialize`] — JSON codec with nesting guard
//! - [`shape`] — pluggable snapshot iterate/get/set
//! - [`store`] — state container interface + `MemoryStore`
//! - [`storage`] — backend interface + `MemoryStorage`, `RocksStorage`
//!
//! ## Example
//!
//! ```no_run
//! use logos_persist::{persist_store, MemoryStorage, MemoryStore, PersistConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), logos_persist::PersistError> {
//! let store = Arc::new(MemoryStore::default());
//! let storage = Arc::new(MemoryStorage::new());
//! let (persistor, _restored) =
//!     persist_store(store.clone(), storage, PersistConfig::for_testing("app_")).await?;
//!
//! store.set("counter", json!(1));
//! persistor.flushed().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detect;
pub mod error;
pub mod persistor;
pub mod restore;
pub mod scheduler;
pub mod serialize;
pub mod shape;
pub mod storage;
pub mod store;
pub mod transform;

// Re-exports for convenience
pub use config::{KeyFilter, PersistConfig, PersistOptions, KEY_PREFIX};
pub use detect::DirtyQueue;
pub use error::{PersistError, PersistResult, SerializeError, StorageError, TransformError};
pub use persistor::{persist_store, Persistor, RehydrateOptions};
pub use restore::get_stored_state;
pub use scheduler::{SchedulerState, Tick, WriteQueue};
pub use serialize::{JsonSerializer, Passthrough, Serializer};
pub use shape::{MapShape, StateMap, StateShape, SubState};
pub use storage::{MemoryStorage, RocksConfig, RocksStorage, Storage};
pub use store::{Action, Listener, MemoryStore, Store, SubscriptionId};
pub use transform::{AsyncTransform, FnTransform, Pipeline, Transform, Transforms};
