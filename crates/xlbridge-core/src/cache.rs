use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::value::Value;

/// Marker prepended to every cache reference string.
pub const CACHE_MARKER: char = '\u{27E8}';

/// String-keyed store of values that are too rich to write to a cell.
///
/// A function returns a reference string from [`ObjectCache::add`]; a later
/// call passes that string back and the cache-lookup converter swaps it for
/// the stored value. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct ObjectCache {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    counter: Arc<AtomicU64>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value owned by `owner` (usually the caller's address) and
    /// return its reference string. Any value the owner stored earlier is
    /// dropped.
    pub fn add(&self, owner: &str, value: Value) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let prefix = owner_prefix(owner);
        let key = format!("{prefix}{n}");
        let mut entries = self.entries();
        entries.retain(|k, _| !k.starts_with(&prefix));
        entries.insert(key.clone(), value);
        key
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries().remove(key)
    }

    /// Drop every entry created for `owner`.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let prefix = owner_prefix(owner);
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(&prefix));
        before - entries.len()
    }

    pub fn is_reference(text: &str) -> bool {
        text.starts_with(CACHE_MARKER)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn owner_prefix(owner: &str) -> String {
    format!("{CACHE_MARKER}{owner}#")
}
