//! Keyed object cache with named secondary indexes.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use super::{BindingIndex, Indexer};
use crate::error::{AccessError, Result};

/// index name → index key → object keys
type Indices = AHashMap<String, AHashMap<String, AHashSet<String>>>;

struct State<T> {
    items: AHashMap<String, Arc<T>>,
    indexers: AHashMap<String, Indexer<T>>,
    indices: Indices,
}

impl<T> State<T> {
    fn index(&mut self, key: &str, obj: &T) {
        for (name, indexer) in &self.indexers {
            let buckets = self.indices.entry(name.clone()).or_default();
            for value in indexer(obj) {
                buckets.entry(value).or_default().insert(key.to_string());
            }
        }
    }

    fn unindex(&mut self, key: &str, obj: &T) {
        for (name, indexer) in &self.indexers {
            let Some(buckets) = self.indices.get_mut(name) else {
                continue;
            };
            for value in indexer(obj) {
                if let Some(keys) = buckets.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        buckets.remove(&value);
                    }
                }
            }
        }
    }
}

/// Thread-safe object store keyed by `name` or `namespace/name`.
///
/// Index entries are recomputed on every write so an updated object never
/// lingers under keys it no longer produces.
pub struct IndexedCache<T> {
    state: RwLock<State<T>>,
}

impl<T> Default for IndexedCache<T> {
    fn default() -> Self {
        Self {
            state: RwLock::new(State {
                items: AHashMap::new(),
                indexers: AHashMap::new(),
                indices: AHashMap::new(),
            }),
        }
    }
}

impl<T> IndexedCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the object at `key`, returning the previous one.
    pub fn upsert(&self, key: &str, obj: T) -> Option<Arc<T>> {
        let obj = Arc::new(obj);
        let mut state = self.state.write();
        let previous = state.items.insert(key.to_string(), obj.clone());
        if let Some(ref old) = previous {
            state.unindex(key, old);
        }
        state.index(key, &obj);
        previous
    }

    pub fn delete(&self, key: &str) -> Option<Arc<T>> {
        let mut state = self.state.write();
        let removed = state.items.remove(key);
        if let Some(ref old) = removed {
            state.unindex(key, old);
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.state.read().items.get(key).cloned()
    }

    pub fn list(&self) -> Vec<Arc<T>> {
        self.state.read().items.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Send + Sync + 'static> BindingIndex<B> for IndexedCache<B> {
    fn add_indexer(&self, name: &str, indexer: Indexer<B>) {
        let mut state = self.state.write();
        let mut buckets: AHashMap<String, AHashSet<String>> = AHashMap::new();
        for (key, obj) in &state.items {
            for value in indexer(obj.as_ref()) {
                buckets.entry(value).or_default().insert(key.clone());
            }
        }
        state.indices.insert(name.to_string(), buckets);
        state.indexers.insert(name.to_string(), indexer);
    }

    fn by_index(&self, name: &str, key: &str) -> Result<Vec<Arc<B>>> {
        let state = self.state.read();
        if !state.indexers.contains_key(name) {
            return Err(AccessError::IndexNotFound(name.to_string()));
        }
        let Some(keys) = state.indices.get(name).and_then(|b| b.get(key)) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| state.items.get(k).cloned())
            .collect())
    }
}
