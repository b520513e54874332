//! Pluggable access to the top-level structure of a state snapshot.
//!
//! The engine never looks inside a subtree. It only needs to walk the
//! top-level keys of a snapshot, read one key, and build a new snapshot key
//! by key during rehydration. Anything that can do those three things can be
//! persisted, not just plain maps.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One top-level subtree. Identity (`Arc::ptr_eq`) is what change detection
/// compares, so a store must hand out the same `Arc` for an untouched key.
pub type SubState = Arc<Value>;

/// Default snapshot type: top-level key → subtree.
pub type StateMap = BTreeMap<String, SubState>;

/// Iterate / get / set over a state snapshot.
pub trait StateShape: Clone + Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;

    /// Empty snapshot. Used as the initial "last observed" state and as the
    /// seed of every restored snapshot.
    fn init(&self) -> Self::State;

    /// Visit every top-level key.
    fn for_each(&self, state: &Self::State, visit: &mut dyn FnMut(&str, &SubState));

    fn get(&self, state: &Self::State, key: &str) -> Option<SubState>;

    fn set(&self, state: &mut Self::State, key: &str, value: SubState);

    /// Collect the top-level keys in iteration order.
    fn keys(&self, state: &Self::State) -> Vec<String> {
        let mut keys = Vec::new();
        self.for_each(state, &mut |key, _| keys.push(key.to_string()));
        keys
    }
}

/// Plain associative snapshot backed by [`StateMap`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MapShape;

impl StateShape for MapShape {
    type State = StateMap;

    fn init(&self) -> StateMap {
        StateMap::new()
    }

    fn for_each(&self, state: &StateMap, visit: &mut dyn FnMut(&str, &SubState)) {
        for (key, value) in state {
            visit(key, value);
        }
    }

    fn get(&self, state: &StateMap, key: &str) -> Option<SubState> {
        state.get(key).cloned()
    }

    fn set(&self, state: &mut StateMap, key: &str, value: SubState) {
        state.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_shape_roundtrip() {
        let shape = MapShape;
        let mut state = shape.init();
        assert!(state.is_empty());

        shape.set(&mut state, "b", Arc::new(json!(2)));
        shape.set(&mut state, "a", Arc::new(json!({"x": 1})));

        assert_eq!(shape.keys(&state), vec!["a", "b"]);
        assert_eq!(*shape.get(&state, "b").unwrap(), json!(2));
        assert!(shape.get(&state, "missing").is_none());
    }

    #[test]
    fn test_get_preserves_identity() {
        let shape = MapShape;
        let mut state = shape.init();
        let value = Arc::new(json!([1, 2, 3]));
        shape.set(&mut state, "list", value.clone());

        let fetched = shape.get(&state, "list").unwrap();
        assert!(Arc::ptr_eq(&fetched, &value));
    }
}
