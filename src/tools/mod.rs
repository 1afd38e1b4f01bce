//! Built-in tools registered at startup.

pub mod calculator;
pub mod storage;

use std::sync::Arc;

use serde_json::Value;

use crate::registry::resources::{ResourceDescriptor, TextResource};
use crate::registry::RegistryBuilder;
use crate::{AppError, Result};

/// URI of the built-in guide to `storage_query` predicates.
pub const PREDICATE_GUIDE_URI: &str = "guide://storage-predicates";

const PREDICATE_GUIDE: &str = "\
# storage_query predicates

Pass `predicate` as an object tagged by `op`:

- `{\"op\": \"all\"}` matches every record (the default).
- `{\"op\": \"key_prefix\", \"prefix\": \"persona:\"}` matches keys with that prefix.
- `{\"op\": \"field_equals\", \"path\": \"/meta/lang\", \"value\": \"en\"}` compares the value at a JSON pointer.
- `{\"op\": \"similar\", \"field\": \"embedding\", \"vector\": [0.1, 0.2], \"min_score\": 0.8}` ranks by cosine similarity.
- `{\"op\": \"and\", \"predicates\": [...]}` requires every nested predicate.

Records come back in key order. Stored values are also readable as
`storage://<collection>/<key>` resources.
";

/// Register every built-in tool and resource.
///
/// # Errors
///
/// Returns `AppError::DuplicateTool` if `builder` already holds one of the
/// built-in names.
pub fn register_builtin(builder: &mut RegistryBuilder) -> Result<()> {
    builder
        .register(Arc::new(calculator::Add::new()))?
        .register(Arc::new(calculator::Multiply::new()))?
        .register(Arc::new(storage::Put::new()))?
        .register(Arc::new(storage::Get::new()))?
        .register(Arc::new(storage::Query::new()))?
        .register(Arc::new(storage::Delete::new()))?;
    builder.register_resource(Arc::new(TextResource::new(
        ResourceDescriptor {
            uri: PREDICATE_GUIDE_URI.into(),
            name: "storage-predicates".into(),
            mime_type: "text/markdown".into(),
            description: "Predicate syntax accepted by storage_query".into(),
        },
        PREDICATE_GUIDE,
    )))?;
    Ok(())
}

/// Required string argument.
fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidParams(format!("{name} must be a string")))
}

/// Required numeric argument.
fn num_arg(args: &Value, name: &str) -> Result<f64> {
    args.get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| AppError::InvalidParams(format!("{name} must be a number")))
}
