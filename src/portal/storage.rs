//! Key-value stores backing the portal's local and session storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Browser-style string storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    fn clear(&self);

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a consistent map of strings
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }

    fn clear(&self) {
        self.entries().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.set("region", "eu-west-2");
        assert_eq!(store.get("region").as_deref(), Some("eu-west-2"));
        assert!(store.contains("region"));
        store.set("region", "us-east-1");
        assert_eq!(store.len(), 1);
        store.remove("region");
        assert!(!store.contains("region"));
    }

    #[test]
    fn test_storage_clear() {
        let store = MemoryStore::new();
        store.set("a", "1");
        store.set("b", "2");
        store.clear();
        assert!(store.is_empty());
    }
}
