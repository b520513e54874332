//! Persistor configuration.
//!
//! [`PersistConfig`] carries everything, including the non-data parts
//! (transforms, custom serializer, state shape). [`PersistOptions`] is the
//! serde-loadable subset, for configs that live in a JSON file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PersistError, PersistResult};
use crate::serialize::{JsonSerializer, Passthrough, Serializer};
use crate::shape::{MapShape, StateShape};
use crate::transform::{Pipeline, Transforms};

/// Default storage key prefix.
pub const KEY_PREFIX: &str = "logosPersist:";

/// Shortest drain interval. A zero debounce still drains asynchronously.
pub const MIN_DRAIN_INTERVAL: Duration = Duration::from_millis(1);

/// Allow/deny filter over logical keys.
///
/// A key is eligible iff the whitelist is absent or contains it, and the
/// blacklist does not contain it.
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    whitelist: Option<HashSet<String>>,
    blacklist: HashSet<String>,
}

impl KeyFilter {
    pub fn new(whitelist: Option<&[String]>, blacklist: &[String]) -> Self {
        Self {
            whitelist: whitelist.map(|keys| keys.iter().cloned().collect()),
            blacklist: blacklist.iter().cloned().collect(),
        }
    }

    pub fn allows(&self, key: &str) -> bool {
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(key) {
                return false;
            }
        }
        !self.blacklist.contains(key)
    }
}

/// Persistor configuration.
#[derive(Clone)]
pub struct PersistConfig<S: StateShape = MapShape> {
    /// Run values through the serializer (default: true). When false the
    /// backend stores transformed values as-is.
    pub serialize: bool,
    /// Replaces the default [`JsonSerializer`] when `serialize` is true.
    pub serializer: Option<Arc<dyn Serializer>>,
    /// Only these keys are persisted, if set.
    pub whitelist: Option<Vec<String>>,
    /// Never persisted.
    pub blacklist: Vec<String>,
    pub transforms: Transforms,
    /// Spacing between drain ticks. `None` or zero drains as fast as the
    /// timer allows.
    pub debounce: Option<Duration>,
    pub key_prefix: String,
    pub shape: S,
}

impl<S: StateShape + Default> Default for PersistConfig<S> {
    fn default() -> Self {
        Self {
            serialize: true,
            serializer: None,
            whitelist: None,
            blacklist: Vec::new(),
            transforms: Transforms::default(),
            debounce: None,
            key_prefix: KEY_PREFIX.to_string(),
            shape: S::default(),
        }
    }
}

impl<S: StateShape + Default> PersistConfig<S> {
    /// Build from loaded options plus the transforms, which cannot live in a
    /// data file.
    pub fn from_options(options: PersistOptions, transforms: Transforms) -> Self {
        Self {
            serialize: options.serialize,
            whitelist: options.whitelist,
            blacklist: options.blacklist,
            transforms,
            debounce: options
                .debounce_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            key_prefix: options.key_prefix.unwrap_or_else(|| KEY_PREFIX.to_string()),
            ..Self::default()
        }
    }
}

impl PersistConfig<MapShape> {
    /// Config for testing: isolated prefix, immediate drain.
    pub fn for_testing(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
            ..Self::default()
        }
    }
}

impl<S: StateShape> PersistConfig<S> {
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    pub fn filter(&self) -> KeyFilter {
        KeyFilter::new(self.whitelist.as_deref(), &self.blacklist)
    }

    pub fn codec(&self) -> Arc<dyn Serializer> {
        if !self.serialize {
            return Arc::new(Passthrough);
        }
        match &self.serializer {
            Some(custom) => custom.clone(),
            None => Arc::new(JsonSerializer::default()),
        }
    }

    pub fn drain_interval(&self) -> Duration {
        self.debounce.unwrap_or_default().max(MIN_DRAIN_INTERVAL)
    }

    pub(crate) fn settings(&self) -> Settings<S> {
        Settings {
            prefix: self.key_prefix.clone(),
            filter: self.filter(),
            codec: self.codec(),
            pipeline: Pipeline::new(self.transforms.clone()),
            shape: self.shape.clone(),
            interval: self.drain_interval(),
        }
    }
}

/// Config resolved into the pieces the engine uses on every key.
pub(crate) struct Settings<S: StateShape> {
    pub prefix: String,
    pub filter: KeyFilter,
    pub codec: Arc<dyn Serializer>,
    pub pipeline: Pipeline,
    pub shape: S,
    pub interval: Duration,
}

impl<S: StateShape> Settings<S> {
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Logical key for a backend key, if it belongs to this namespace.
    pub fn logical_key<'k>(&self, storage_key: &'k str) -> Option<&'k str> {
        storage_key.strip_prefix(self.prefix.as_str())
    }
}

/// Serde-loadable configuration subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistOptions {
    pub serialize: bool,
    pub whitelist: Option<Vec<String>>,
    pub blacklist: Vec<String>,
    pub debounce_ms: Option<u64>,
    pub key_prefix: Option<String>,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            serialize: true,
            whitelist: None,
            blacklist: Vec::new(),
            debounce_ms: None,
            key_prefix: None,
        }
    }
}

impl PersistOptions {
    pub fn from_json(text: &str) -> PersistResult<Self> {
        serde_json::from_str(text).map_err(|e| PersistError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_whitelist_then_blacklist() {
        let whitelist = keys(&["a", "b"]);
        let filter = KeyFilter::new(Some(&whitelist), &keys(&["b"]));
        assert!(filter.allows("a"));
        assert!(!filter.allows("b"));
        assert!(!filter.allows("c"));
    }

    #[test]
    fn test_filter_blacklist_only() {
        let filter = KeyFilter::new(None, &keys(&["b"]));
        assert!(filter.allows("a"));
        assert!(!filter.allows("b"));
        assert!(filter.allows("anything_else"));
    }

    #[test]
    fn test_default_config() {
        let config: PersistConfig = PersistConfig::default();
        assert!(config.serialize);
        assert_eq!(config.key_prefix, KEY_PREFIX);
        assert_eq!(config.storage_key("counter"), "logosPersist:counter");
        assert_eq!(config.drain_interval(), MIN_DRAIN_INTERVAL);
    }

    #[test]
    fn test_zero_debounce_clamped() {
        let config = PersistConfig {
            debounce: Some(Duration::ZERO),
            ..PersistConfig::for_testing("t:")
        };
        assert_eq!(config.drain_interval(), MIN_DRAIN_INTERVAL);

        let config = PersistConfig {
            debounce: Some(Duration::from_millis(250)),
            ..PersistConfig::for_testing("t:")
        };
        assert_eq!(config.drain_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_logical_key_strips_prefix() {
        let settings = PersistConfig::for_testing("app_").settings();
        assert_eq!(settings.logical_key("app_counter"), Some("counter"));
        assert_eq!(settings.logical_key("other_counter"), None);
        assert_eq!(settings.storage_key("profile"), "app_profile");
    }

    #[test]
    fn test_options_from_json() {
        let options = PersistOptions::from_json(
            r#"{ "whitelist": ["counter"], "debounce_ms": 0, "key_prefix": "app_" }"#,
        )
        .unwrap();
        assert!(options.serialize);
        assert_eq!(options.blacklist, Vec::<String>::new());

        let config: PersistConfig = PersistConfig::from_options(options, Transforms::default());
        assert_eq!(config.whitelist, Some(keys(&["counter"])));
        assert_eq!(config.debounce, None);
        assert_eq!(config.key_prefix, "app_");
    }

    #[test]
    fn test_options_reject_malformed() {
        assert!(matches!(
            PersistOptions::from_json("{ \"serialize\": \"yes\" }"),
            Err(PersistError::Configuration(_))
        ));
    }
}
