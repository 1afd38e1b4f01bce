//! Read-only resources addressed by URI.

use std::path::PathBuf;

use serde::Serialize;

use crate::storage::{BoxFuture, Storage};
use crate::{AppError, Result};

/// Scheme of resources served straight from storage.
pub const STORAGE_SCHEME: &str = "storage://";

/// Scheme of discovered prompt files.
pub const PROMPT_SCHEME: &str = "prompt://";

/// Entry returned by `resources/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Unique URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Media type of the contents.
    pub mime_type: String,
    /// Human-readable summary.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// One item of a `resources/read` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI that was read.
    pub uri: String,
    /// Media type of `text`.
    pub mime_type: String,
    /// Contents.
    pub text: String,
}

/// A readable resource.
pub trait Resource: Send + Sync {
    /// Listing entry.
    fn descriptor(&self) -> &ResourceDescriptor;

    /// Current contents.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceNotFound` if the backing data vanished and
    /// `AppError::Io` on read failures.
    fn read(&self) -> BoxFuture<'_, Result<ResourceContents>>;
}

/// Resource with fixed in-memory text.
#[derive(Debug, Clone)]
pub struct TextResource {
    descriptor: ResourceDescriptor,
    text: String,
}

impl TextResource {
    /// Build a text resource.
    #[must_use]
    pub fn new(descriptor: ResourceDescriptor, text: impl Into<String>) -> Self {
        Self {
            descriptor,
            text: text.into(),
        }
    }
}

impl Resource for TextResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn read(&self) -> BoxFuture<'_, Result<ResourceContents>> {
        Box::pin(async move {
            Ok(ResourceContents {
                uri: self.descriptor.uri.clone(),
                mime_type: self.descriptor.mime_type.clone(),
                text: self.text.clone(),
            })
        })
    }
}

/// Markdown prompt file found by discovery; read from disk on every access.
#[derive(Debug, Clone)]
pub struct PromptFile {
    descriptor: ResourceDescriptor,
    path: PathBuf,
}

impl PromptFile {
    /// `relative` is the path below the discovery root without extension.
    #[must_use]
    pub fn new(relative: &str, path: PathBuf) -> Self {
        let name = relative.rsplit('/').next().unwrap_or(relative).to_owned();
        Self {
            descriptor: ResourceDescriptor {
                uri: format!("{PROMPT_SCHEME}{relative}"),
                name,
                mime_type: "text/markdown".into(),
                description: format!("Prompt file {}", path.display()),
            },
            path,
        }
    }
}

impl Resource for PromptFile {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn read(&self) -> BoxFuture<'_, Result<ResourceContents>> {
        Box::pin(async move {
            let text = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    AppError::ResourceNotFound(self.descriptor.uri.clone())
                } else {
                    AppError::Io(format!("failed to read {}: {err}", self.path.display()))
                }
            })?;
            Ok(ResourceContents {
                uri: self.descriptor.uri.clone(),
                mime_type: self.descriptor.mime_type.clone(),
                text,
            })
        })
    }
}

/// Split `storage://collection/key`; the key may itself contain `/`.
#[must_use]
pub fn parse_storage_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix(STORAGE_SCHEME)?;
    let (collection, key) = rest.split_once('/')?;
    (!collection.is_empty() && !key.is_empty()).then_some((collection, key))
}

/// Read a `storage://` URI from the backend.
///
/// # Errors
///
/// Returns `AppError::ResourceNotFound` for malformed URIs and absent keys.
pub async fn read_storage_uri(storage: &Storage, uri: &str) -> Result<ResourceContents> {
    let (collection, key) =
        parse_storage_uri(uri).ok_or_else(|| AppError::ResourceNotFound(uri.to_owned()))?;
    let value = storage.get(collection, key).await.map_err(|err| match err {
        AppError::NotFound(_) => AppError::ResourceNotFound(uri.to_owned()),
        other => other,
    })?;
    Ok(ResourceContents {
        uri: uri.to_owned(),
        mime_type: "application/json".into(),
        text: value.to_string(),
    })
}
