//! Rehydration: rebuild a state snapshot from storage.
//!
//! ```text
//! get_all_keys ──► strip prefix ──► filter ──┬─► get_item ─► decode ─► inbound ─┐
//!   (fatal)                                  ├─► get_item ─► decode ─► inbound ─┤ join
//!                                            └─► get_item ─► decode ─► inbound ─┘
//!                                               any per-key failure ─► null
//! ```
//!
//! Only a failed listing fails the whole restore. Every other fault is
//! confined to its key, which is restored as `null`.

use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{PersistConfig, Settings};
use crate::error::{PersistError, PersistResult};
use crate::shape::StateShape;
use crate::storage::Storage;

/// Read every persisted key of `config`'s namespace from `storage`.
pub async fn get_stored_state<S: StateShape>(
    config: &PersistConfig<S>,
    storage: &dyn Storage,
) -> PersistResult<S::State> {
    restore_with(&config.settings(), storage).await
}

pub(crate) async fn restore_with<S: StateShape>(
    settings: &Settings<S>,
    storage: &dyn Storage,
) -> PersistResult<S::State> {
    let all_keys = storage.get_all_keys().await.map_err(|e| {
        log::warn!("Failed to list storage keys: {e}");
        PersistError::Storage(e)
    })?;

    let keys: Vec<&str> = all_keys
        .iter()
        .filter_map(|k| settings.logical_key(k))
        .filter(|k| settings.filter.allows(k))
        .collect();

    let mut restored = settings.shape.init();
    if keys.is_empty() {
        return Ok(restored);
    }

    let results = join_all(keys.iter().map(|key| restore_key(settings, storage, key))).await;

    let mut failed = 0;
    for (key, result) in keys.iter().zip(results) {
        let value = result.unwrap_or_else(|e| {
            log::warn!("Failed to restore key `{key}`: {e}");
            failed += 1;
            Value::Null
        });
        settings.shape.set(&mut restored, key, Arc::new(value));
    }

    log::info!(
        "Restored {}/{} keys from storage",
        keys.len() - failed,
        keys.len()
    );
    Ok(restored)
}

async fn restore_key<S: StateShape>(
    settings: &Settings<S>,
    storage: &dyn Storage,
    key: &str,
) -> PersistResult<Value> {
    let storage_key = settings.storage_key(key);
    let stored = match storage.get_item(&storage_key).await? {
        Some(stored) => stored,
        None => {
            log::debug!("Key `{key}` vanished between listing and read");
            return Ok(Value::Null);
        }
    };
    let data = settings.codec.deserialize(stored)?;
    Ok(settings.pipeline.inbound(data, key).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::StateMap;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_restore_strips_prefix_and_ignores_foreign_keys() {
        let storage = MemoryStorage::with_entries([
            ("app_counter", json!("1")),
            ("app_profile", json!("{\"name\":\"x\"}")),
            ("other_counter", json!("99")),
        ]);
        let config = PersistConfig::for_testing("app_");

        let restored: StateMap = get_stored_state(&config, &storage).await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(*restored["counter"], json!(1));
        assert_eq!(*restored["profile"], json!({"name": "x"}));
    }

    #[tokio::test]
    async fn test_restore_empty_namespace() {
        let storage = MemoryStorage::with_entries([("elsewhere", json!("1"))]);
        let restored = get_stored_state(&PersistConfig::for_testing("app_"), &storage)
            .await
            .unwrap();
        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn test_restore_applies_filter() {
        let storage = MemoryStorage::with_entries([
            ("p:a", json!("1")),
            ("p:b", json!("2")),
            ("p:c", json!("3")),
        ]);
        let config = PersistConfig {
            whitelist: Some(vec!["a".into(), "b".into()]),
            blacklist: vec!["b".into()],
            ..PersistConfig::for_testing("p:")
        };
        let restored = get_stored_state(&config, &storage).await.unwrap();
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_corrupt_payload_restores_as_null() {
        let storage = MemoryStorage::with_entries([
            ("p:good", json!("true")),
            ("p:bad", json!("{truncated")),
        ]);
        let restored = get_stored_state(&PersistConfig::for_testing("p:"), &storage)
            .await
            .unwrap();
        assert_eq!(*restored["good"], json!(true));
        assert_eq!(*restored["bad"], Value::Null);
    }

    #[tokio::test]
    async fn test_unserialized_namespace() {
        let storage = MemoryStorage::with_entries([("p:raw", json!({"already": "decoded"}))]);
        let config = PersistConfig {
            serialize: false,
            ..PersistConfig::for_testing("p:")
        };
        let restored = get_stored_state(&config, &storage).await.unwrap();
        assert_eq!(*restored["raw"], json!({"already": "decoded"}));
    }
}
