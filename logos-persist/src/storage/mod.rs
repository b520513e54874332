//! Key-value storage backends.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   set_item(prefix+key)   ┌──────────────────┐
//! │ Persistor   │ ───────────────────────► │ dyn Storage      │
//! │ (scheduler) │                          │                  │
//! └─────────────┘                          │  MemoryStorage   │
//! ┌─────────────┐   get_all_keys/get_item  │  RocksStorage    │
//! │ restore     │ ◄─────────────────────── │  (your backend)  │
//! └─────────────┘                          └──────────────────┘
//! ```
//!
//! Every operation returns a boxed future, so in-process maps and real I/O
//! backends satisfy the same interface. The engine only suspends at these
//! calls.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStorage;
pub use rocks::{RocksConfig, RocksStorage};

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::StorageError;

/// Future returned by every [`Storage`] operation.
pub type StorageFuture<'a, T> = BoxFuture<'a, Result<T, StorageError>>;

/// Asynchronous key-value backend.
pub trait Storage: Send + Sync {
    /// Read one entry. `Ok(None)` when the key is absent.
    fn get_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Value>>;

    fn set_item<'a>(&'a self, key: &'a str, value: Value) -> StorageFuture<'a, ()>;

    fn remove_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;

    /// Every key in the backend, across all namespaces.
    fn get_all_keys(&self) -> StorageFuture<'_, Vec<String>>;
}
