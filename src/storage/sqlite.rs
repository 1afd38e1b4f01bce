//! Embedded `SQLite` document store.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{schema, BoxFuture, Record, StorageBackend};
use crate::config::StorageKind;
use crate::{AppError, Result};

/// Path value that opens a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct DocumentRow {
    key: String,
    value: String,
}

impl DocumentRow {
    fn into_record(self) -> Result<Record> {
        let value = serde_json::from_str(&self.value)
            .map_err(|err| AppError::Storage(format!("corrupt document {}: {err}", self.key)))?;
        Ok(Record::new(self.key, value))
    }
}

/// Documents stored as JSON text keyed by `(collection, key)`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    ///
    /// `:memory:` opens a private in-memory database on a single connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the directory, connection or schema
    /// cannot be created.
    pub async fn open(path: &Path) -> Result<Self> {
        let in_memory = path.as_os_str() == IN_MEMORY_PATH;
        let (options, max_connections) = if in_memory {
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|err| {
                    AppError::Storage(format!("failed to create db dir {}: {err}", parent.display()))
                })?;
            }
            (
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true),
                5,
            )
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        schema::bootstrap_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl StorageBackend for SqliteStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Document
    }

    fn put<'a>(&'a self, collection: &'a str, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let encoded = serde_json::to_string(&value)
                .map_err(|err| AppError::Storage(format!("failed to encode document: {err}")))?;
            sqlx::query(
                "INSERT INTO document (collection, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
            )
            .bind(collection)
            .bind(key)
            .bind(encoded)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let row: Option<DocumentRow> = sqlx::query_as(
                "SELECT key, value FROM document WHERE collection = ?1 AND key = ?2",
            )
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            row.map(|r| r.into_record().map(|record| record.value))
                .transpose()
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM document WHERE collection = ?1 AND key = ?2")
                .bind(collection)
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
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
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            // substr keeps LIKE wildcards in the prefix literal.
            let rows: Vec<DocumentRow> = sqlx::query_as(
                "SELECT key, value FROM document
                 WHERE collection = ?1
                   AND (?2 IS NULL OR key > ?2)
                   AND (?3 IS NULL OR substr(key, 1, length(?3)) = ?3)
                 ORDER BY key ASC
                 LIMIT ?4",
            )
            .bind(collection)
            .bind(after)
            .bind(prefix)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(DocumentRow::into_record).collect()
        })
    }

    fn collections(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let names: Vec<(String,)> =
                sqlx::query_as("SELECT DISTINCT collection FROM document ORDER BY collection ASC")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(names.into_iter().map(|(name,)| name).collect())
        })
    }
}
