//! Vector store layered over a document backend.
//!
//! Documents may carry an `embedding` array; when present it must hold
//! exactly `dimensions` numbers. Similarity ranking is done by
//! [`Predicate::Similar`](super::Predicate::Similar) during queries.

use std::sync::Arc;

use serde_json::Value;

use super::predicate::as_vector;
use super::{BoxFuture, Record, StorageBackend};
use crate::config::StorageKind;
use crate::{AppError, Result};

/// Field holding a document's embedding.
pub const EMBEDDING_FIELD: &str = "embedding";

/// Embedding-validating wrapper around another backend.
pub struct VectorStore {
    inner: Arc<dyn StorageBackend>,
    dimensions: usize,
}

impl VectorStore {
    /// Wrap `inner`, requiring embeddings of length `dimensions`.
    #[must_use]
    pub fn new(inner: Arc<dyn StorageBackend>, dimensions: usize) -> Self {
        Self { inner, dimensions }
    }

    /// Expected embedding length.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_embedding(&self, value: &Value) -> Result<()> {
        let Some(raw) = value.get(EMBEDDING_FIELD) else {
            return Ok(());
        };
        let embedding = as_vector(raw).ok_or_else(|| {
            AppError::InvalidParams(format!("{EMBEDDING_FIELD} must be an array of numbers"))
        })?;
        if embedding.len() != self.dimensions {
            return Err(AppError::InvalidParams(format!(
                "{EMBEDDING_FIELD} has {} dimensions, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

impl StorageBackend for VectorStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Vector
    }

    fn put<'a>(&'a self, collection: &'a str, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_embedding(&value)?;
            self.inner.put(collection, key, value).await
        })
    }

    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        self.inner.get(collection, key)
    }

    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        self.inner.delete(collection, key)
    }

    fn scan_page<'a>(
        &'a self,
        collection: &'a str,
        prefix: Option<&'a str>,
        after: Option<&'a str>,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Record>>> {
        self.inner.scan_page(collection, prefix, after, limit)
    }

    fn collections(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.inner.collections()
    }
}
