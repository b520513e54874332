//! In-process storage backend.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Storage, StorageFuture};

/// `BTreeMap`-backed storage. Operations complete without suspending.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing entries.
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            entries: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Synchronous read for inspection.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl Storage for MemoryStorage {
    fn get_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<Value>> {
        Box::pin(async move { Ok(self.entries.read().get(key).cloned()) })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: Value) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.entries.write().insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.entries.write().remove(key);
            Ok(())
        })
    }

    fn get_all_keys(&self) -> StorageFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.entries.read().keys().cloned().collect()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_storage_crud() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.set_item("a", json!("1")).await.unwrap();
        storage.set_item("b", json!("2")).await.unwrap();
        assert_eq!(storage.get_item("a").await.unwrap(), Some(json!("1")));
        assert_eq!(storage.get_all_keys().await.unwrap(), vec!["a", "b"]);

        storage.remove_item("a").await.unwrap();
        assert_eq!(storage.get_item("a").await.unwrap(), None);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_seeded_entries() {
        let storage = MemoryStorage::with_entries([("x", json!(true))]);
        assert_eq!(storage.peek("x"), Some(json!(true)));
        assert_eq!(storage.keys(), vec!["x"]);
    }
}
