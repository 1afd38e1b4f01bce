//! Process-local backend; nothing survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use serde_json::Value;
use tokio::sync::RwLock;

use super::{BoxFuture, Record, StorageBackend};
use crate::config::StorageKind;
use crate::Result;

/// Ordered maps per collection behind one reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    fn put<'a>(&'a self, collection: &'a str, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.collections
                .write()
                .await
                .entry(collection.to_owned())
                .or_default()
                .insert(key.to_owned(), value);
            Ok(())
        })
    }

    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let guard = self.collections.read().await;
            Ok(guard.get(collection).and_then(|docs| docs.get(key)).cloned())
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut guard = self.collections.write().await;
            let Some(docs) = guard.get_mut(collection) else {
                return Ok(false);
            };
            let removed = docs.remove(key).is_some();
            if docs.is_empty() {
                guard.remove(collection);
            }
            Ok(removed)
        })
    }

    fn scan_page<'a>(
        &'a self,
        collection: &'a str,
        prefix: Option<&'a str>,
        after: Option<&'a str>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Record>>> {
        Box::pin(async move {
            let guard = self.collections.read().await;
            let Some(docs) = guard.get(collection) else {
                return Ok(Vec::new());
            };
            let lower = match (after, prefix) {
                (Some(after), Some(prefix)) if prefix > after => Bound::Included(prefix),
                (Some(after), _) => Bound::Excluded(after),
                (None, Some(prefix)) => Bound::Included(prefix),
                (None, None) => Bound::Unbounded,
            };
            let page = docs
                .range::<str, _>((lower, Bound::Unbounded))
                .take_while(|(key, _)| prefix.is_none_or(|p| key.starts_with(p)))
                .take(limit)
                .map(|(key, value)| Record::new(key.clone(), value.clone()))
                .collect();
            Ok(page)
        })
    }

    fn collections(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }
}
