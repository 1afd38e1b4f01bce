//! The capability contract every tool implements.

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::mcp::protocol::RequestId;
use crate::storage::{BoxFuture, Storage};
use crate::Result;

/// Category assigned when a tool does not name one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Static description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Unique name clients call the tool by.
    pub name: String,
    /// Human-readable summary.
    pub description: String,
    /// JSON-schema-like description of `arguments`.
    pub input_schema: Value,
    /// Grouping used for enablement and timeouts.
    pub category: String,
    /// Same-name invocations may overlap.
    #[serde(skip)]
    pub reentrant: bool,
    /// Results may be memoized for `tools.cache_ttl_seconds`.
    #[serde(skip)]
    pub cacheable: bool,
}

impl ToolSpec {
    /// Non-reentrant, uncached tool in the default category.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            category: DEFAULT_CATEGORY.into(),
            reentrant: false,
            cacheable: false,
        }
    }

    /// Set the category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Allow concurrent invocations.
    #[must_use]
    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    /// Allow result memoization.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

/// One item of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// Content blocks returned to the client.
    pub content: Vec<ContentBlock>,
    /// Tool-level failure reported as content rather than a protocol error.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutput {
    /// Single text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Single text block holding compact JSON.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// Wire form used as the `tools/call` result.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"content": []}))
    }
}

/// Everything a running tool may use.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session that issued the call.
    pub session_id: String,
    /// Id of the `tools/call` request.
    pub request_id: Option<RequestId>,
    /// Fires when the request is cancelled or its session closes.
    pub cancel: CancellationToken,
    /// Shared storage handle.
    pub storage: Storage,
}

/// An invocable capability.
///
/// Arguments reach [`Tool::invoke`] already validated against
/// [`ToolSpec::input_schema`].
pub trait Tool: Send + Sync {
    /// Static description.
    fn spec(&self) -> &ToolSpec;

    /// Run the tool.
    ///
    /// # Errors
    ///
    /// Any error is reported to the client as a tool execution failure.
    fn invoke<'a>(&'a self, ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>>;
}
