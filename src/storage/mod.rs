//! Uniform persistence interface over interchangeable embedded engines.
//!
//! Tools talk to a [`Storage`] handle; the engine behind it is chosen by
//! `storage.type` at startup and stays fixed for the life of the process.
//! A `put` followed by a `get` of the same key always observes the write.

pub mod memory;
pub mod predicate;
pub mod schema;
pub mod sqlite;
pub mod vector;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::{StorageConfig, StorageKind};
use crate::{AppError, Result};

pub use predicate::Predicate;

/// Boxed future returned by backend operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lazy, finite sequence of query results.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Number of rows fetched per backend round-trip while streaming a query.
pub const PAGE_SIZE: usize = 64;

/// One stored value with its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Key within the collection.
    pub key: String,
    /// Stored JSON document.
    pub value: Value,
    /// Similarity score when the query ranked by embedding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Record {
    /// Record without a score.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            score: None,
        }
    }
}

/// Engine-specific persistence operations.
///
/// Concurrency control is the engine's own; callers may assume
/// single-writer/multiple-reader semantics per collection.
pub trait StorageBackend: Send + Sync {
    /// Engine kind, for logs and diagnostics.
    fn kind(&self) -> StorageKind;

    /// Insert or replace `key` in `collection`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the write fails.
    fn put<'a>(&'a self, collection: &'a str, key: &'a str, value: Value)
        -> BoxFuture<'a, Result<()>>;

    /// Read `key`; `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the read fails.
    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

    /// Remove `key`; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the delete fails.
    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Up to `limit` records ordered by key, strictly after `after`, whose
    /// keys start with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the scan fails.
    fn scan_page<'a>(
        &'a self,
        collection: &'a str,
        prefix: Option<&'a str>,
        after: Option<&'a str>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Record>>>;

    /// Names of collections holding at least one record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the listing fails.
    fn collections(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Shared, cloneable handle to the configured backend.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.backend.kind())
            .finish()
    }
}

impl Storage {
    /// Wrap an existing backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Process-local store, mainly for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(memory::MemoryStore::new()))
    }

    /// Open the backend selected by configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the database cannot be opened or its
    /// schema cannot be applied.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let backend: Arc<dyn StorageBackend> = match config.kind {
            StorageKind::Memory => Arc::new(memory::MemoryStore::new()),
            StorageKind::Document => Arc::new(sqlite::SqliteStore::open(&config.path).await?),
            StorageKind::Vector => {
                let documents = sqlite::SqliteStore::open(&config.path).await?;
                Arc::new(vector::VectorStore::new(
                    Arc::new(documents),
                    config.vector_dimensions,
                ))
            }
        };
        info!(kind = ?config.kind, path = %config.path.display(), "storage backend ready");
        Ok(Self::new(backend))
    }

    /// Engine kind.
    #[must_use]
    pub fn kind(&self) -> StorageKind {
        self.backend.kind()
    }

    /// Insert or replace a value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidParams` for an empty collection or key and
    /// `AppError::Storage` if the backend rejects the write.
    pub async fn put(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        check_names(collection, Some(key))?;
        self.backend.put(collection, key, value).await
    }

    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the key is absent.
    pub async fn get(&self, collection: &str, key: &str) -> Result<Value> {
        check_names(collection, Some(key))?;
        self.backend
            .get(collection, key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{collection}/{key}")))
    }

    /// Remove a value; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the backend fails.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        check_names(collection, Some(key))?;
        self.backend.delete(collection, key).await
    }

    /// Collections with at least one record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the backend fails.
    pub async fn collections(&self) -> Result<Vec<String>> {
        self.backend.collections().await
    }

    /// Stream every record of `collection` matching `predicate`, in key order.
    ///
    /// Pages are fetched on demand; dropping the stream stops fetching and
    /// calling `query` again starts over from the first key.
    #[must_use]
    pub fn query(&self, collection: &str, predicate: Predicate) -> RecordStream {
        if let Err(err) = check_names(collection, None) {
            return stream::once(async move { Err(err) }).boxed();
        }

        let state = QueryState {
            backend: Arc::clone(&self.backend),
            collection: collection.to_owned(),
            predicate,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(record) = state.buffer.pop_front() {
                    return Ok(Some((record, state)));
                }
                if state.exhausted {
                    return Ok(None);
                }
                let page = state
                    .backend
                    .scan_page(
                        &state.collection,
                        state.predicate.key_prefix(),
                        state.cursor.as_deref(),
                        PAGE_SIZE,
                    )
                    .await?;
                if page.len() < PAGE_SIZE {
                    state.exhausted = true;
                }
                if let Some(last) = page.last() {
                    state.cursor = Some(last.key.clone());
                }
                let predicate = &state.predicate;
                state
                    .buffer
                    .extend(page.into_iter().filter_map(|record| predicate.apply(record)));
            }
        })
        .boxed()
    }
}

struct QueryState {
    backend: Arc<dyn StorageBackend>,
    collection: String,
    predicate: Predicate,
    cursor: Option<String>,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

fn check_names(collection: &str, key: Option<&str>) -> Result<()> {
    if collection.trim().is_empty() {
        return Err(AppError::InvalidParams("collection must not be empty".into()));
    }
    if key.is_some_and(|k| k.is_empty()) {
        return Err(AppError::InvalidParams("key must not be empty".into()));
    }
    Ok(())
}
