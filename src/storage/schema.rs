//! `SQLite` schema bootstrap for the document store.
//!
//! Uses `CREATE TABLE IF NOT EXISTS`, so it is safe to run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Create the `document` table and its indexes if they are missing.
///
/// # Errors
///
/// Returns `AppError::Storage` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS document (
    collection  TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);

CREATE INDEX IF NOT EXISTS idx_document_updated ON document(collection, updated_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
