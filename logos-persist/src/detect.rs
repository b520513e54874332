//! Selective change detection.
//!
//! Compares two snapshots key by key using `Arc` identity, never deep
//! equality, so a pass costs O(top-level keys) whatever the subtree sizes.
//! Changed keys that pass the filter land in the [`DirtyQueue`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::config::KeyFilter;
use crate::shape::StateShape;

/// Ordered set of keys awaiting a write.
///
/// Insertion order is drain order. A key already queued is not queued again,
/// however often it changes before being drained.
#[derive(Debug, Default)]
pub struct DirtyQueue {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl DirtyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key. Returns false if it was already queued.
    pub fn enqueue(&mut self, key: &str) -> bool {
        if self.members.contains(key) {
            return false;
        }
        self.members.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    /// Take the oldest key.
    pub fn pop(&mut self) -> Option<String> {
        let key = self.order.pop_front()?;
        self.members.remove(&key);
        Some(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in drain order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// Call `visit` for every key of `current` whose subtree is not the same
/// `Arc` as in `previous`. Keys missing from `previous` count as changed.
pub fn for_each_changed<S: StateShape>(
    shape: &S,
    previous: &S::State,
    current: &S::State,
    visit: &mut dyn FnMut(&str),
) {
    shape.for_each(current, &mut |key, value| {
        let unchanged = shape
            .get(previous, key)
            .is_some_and(|old| Arc::ptr_eq(&old, value));
        if !unchanged {
            visit(key);
        }
    });
}

/// Queue every changed, eligible key. Returns how many were newly queued.
pub fn detect_changes<S: StateShape>(
    shape: &S,
    filter: &KeyFilter,
    previous: &S::State,
    current: &S::State,
    queue: &mut DirtyQueue,
) -> usize {
    let mut queued = 0;
    for_each_changed(shape, previous, current, &mut |key| {
        if filter.allows(key) && queue.enqueue(key) {
            queued += 1;
        }
    });
    queued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{MapShape, StateMap};
    use serde_json::json;

    fn state(entries: &[(&str, &Arc<serde_json::Value>)]) -> StateMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Arc::clone(v)))
            .collect()
    }

    #[test]
    fn test_dirty_queue_dedup_and_order() {
        let mut queue = DirtyQueue::new();
        assert!(queue.enqueue("b"));
        assert!(queue.enqueue("a"));
        assert!(!queue.enqueue("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.keys().collect::<Vec<_>>(), vec!["b", "a"]);

        assert_eq!(queue.pop().as_deref(), Some("b"));
        // Drained keys may be queued again.
        assert!(queue.enqueue("b"));
        assert_eq!(queue.keys().collect::<Vec<_>>(), vec!["a", "b"]);

        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.contains("a"));
    }

    #[test]
    fn test_identity_not_equality() {
        let one = Arc::new(json!({"deep": [1, 2, 3]}));
        let same_content = Arc::new(json!({"deep": [1, 2, 3]}));
        let other = Arc::new(json!("x"));

        let previous = state(&[("a", &one), ("b", &other)]);
        let current = state(&[("a", &same_content), ("b", &other)]);

        let mut changed = Vec::new();
        for_each_changed(&MapShape, &previous, &current, &mut |k| changed.push(k.to_string()));
        assert_eq!(changed, vec!["a"]);
    }

    #[test]
    fn test_new_keys_count_as_changed() {
        let v = Arc::new(json!(1));
        let previous = StateMap::new();
        let current = state(&[("fresh", &v)]);

        let mut queue = DirtyQueue::new();
        let queued = detect_changes(&MapShape, &KeyFilter::default(), &previous, &current, &mut queue);
        assert_eq!(queued, 1);
        assert!(queue.contains("fresh"));
    }

    #[test]
    fn test_filtered_and_duplicate_keys_skipped() {
        let v1 = Arc::new(json!(1));
        let v2 = Arc::new(json!(2));
        let previous = StateMap::new();
        let current = state(&[("a", &v1), ("b", &v2), ("c", &v1)]);

        let whitelist = vec!["a".to_string(), "b".to_string()];
        let filter = KeyFilter::new(Some(&whitelist), &["b".to_string()]);

        let mut queue = DirtyQueue::new();
        queue.enqueue("a");
        let queued = detect_changes(&MapShape, &filter, &previous, &current, &mut queue);

        assert_eq!(queued, 0);
        assert_eq!(queue.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_repeated_changes_queue_once() {
        let mut queue = DirtyQueue::new();
        let mut previous = StateMap::new();
        for i in 0..5 {
            let current = state(&[("counter", &Arc::new(json!(i)))]);
            detect_changes(&MapShape, &KeyFilter::default(), &previous, &current, &mut queue);
            previous = current;
        }
        assert_eq!(queue.len(), 1);
    }
}
