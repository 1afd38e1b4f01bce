//! Tools exposing the storage abstraction to clients.

use futures_util::StreamExt;
use serde_json::{json, Value};

use super::str_arg;
use crate::registry::{Tool, ToolContext, ToolOutput, ToolSpec};
use crate::storage::{BoxFuture, Predicate};
use crate::{AppError, Result};

const CATEGORY: &str = "storage";

/// Rows returned by `storage_query` when `limit` is omitted.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Upper bound on `limit`.
pub const MAX_QUERY_LIMIT: usize = 1000;

fn key_schema(extra: &[(&str, Value)], required: &[&str]) -> Value {
    let mut properties = json!({
        "collection": {"type": "string", "minLength": 1},
        "key": {"type": "string", "minLength": 1}
    });
    for (name, schema) in extra {
        properties[*name] = schema.clone();
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// `storage_put`: insert or replace a JSON value.
#[derive(Debug)]
pub struct Put {
    spec: ToolSpec,
}

impl Put {
    /// Tool instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "storage_put",
                "Store a JSON value under collection/key",
                key_schema(&[("value", json!({}))], &["collection", "key", "value"]),
            )
            .category(CATEGORY),
        }
    }
}

impl Default for Put {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for Put {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            let collection = str_arg(&args, "collection")?;
            let key = str_arg(&args, "key")?;
            let value = args.get("value").cloned().unwrap_or(Value::Null);
            ctx.storage.put(collection, key, value).await?;
            Ok(ToolOutput::json(&json!({"stored": format!("{collection}/{key}")})))
        })
    }
}

/// `storage_get`: read one value.
#[derive(Debug)]
pub struct Get {
    spec: ToolSpec,
}

impl Get {
    /// Tool instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "storage_get",
                "Read the JSON value stored under collection/key",
                key_schema(&[], &["collection", "key"]),
            )
            .category(CATEGORY)
            .reentrant(),
        }
    }
}

impl Default for Get {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for Get {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            let value = ctx
                .storage
                .get(str_arg(&args, "collection")?, str_arg(&args, "key")?)
                .await?;
            Ok(ToolOutput::json(&value))
        })
    }
}

/// `storage_query`: list matching records in key order.
#[derive(Debug)]
pub struct Query {
    spec: ToolSpec,
}

impl Query {
    /// Tool instance.
    #[must_use]
    pub fn new() -> Self {
        let schema = json!({
            "type": "object",
            "properties": {
                "collection": {"type": "string", "minLength": 1},
                "predicate": {"type": "object"},
                "limit": {"type": "integer", "minimum": 1, "maximum": MAX_QUERY_LIMIT}
            },
            "required": ["collection"],
            "additionalProperties": false
        });
        Self {
            spec: ToolSpec::new(
                "storage_query",
                "Query a collection with an optional predicate",
                schema,
            )
            .category(CATEGORY)
            .reentrant(),
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for Query {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            let collection = str_arg(&args, "collection")?;
            let predicate = match args.get("predicate") {
                Some(raw) => serde_json::from_value::<Predicate>(raw.clone())
                    .map_err(|err| AppError::InvalidParams(format!("predicate: {err}")))?,
                None => Predicate::All,
            };
            let limit = args
                .get("limit")
                .and_then(Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(DEFAULT_QUERY_LIMIT)
                .min(MAX_QUERY_LIMIT);

            let mut stream = ctx.storage.query(collection, predicate).take(limit);
            let mut records = Vec::new();
            loop {
                tokio::select! {
                    () = ctx.cancel.cancelled() => {
                        return Err(AppError::Cancelled("storage_query cancelled".into()));
                    }
                    next = stream.next() => match next {
                        Some(record) => records.push(record?),
                        None => break,
                    }
                }
            }
            Ok(ToolOutput::json(&json!({ "records": records })))
        })
    }
}

/// `storage_delete`: remove one value.
#[derive(Debug)]
pub struct Delete {
    spec: ToolSpec,
}

impl Delete {
    /// Tool instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "storage_delete",
                "Delete the value stored under collection/key",
                key_schema(&[], &["collection", "key"]),
            )
            .category(CATEGORY),
        }
    }
}

impl Default for Delete {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for Delete {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            let deleted = ctx
                .storage
                .delete(str_arg(&args, "collection")?, str_arg(&args, "key")?)
                .await?;
            Ok(ToolOutput::json(&json!({ "deleted": deleted })))
        })
    }
}
