//! Shared test helpers for engine, registry and transport tests.
//!
//! Provides in-memory configuration, registries with the built-in tools plus
//! instrumented probe tools, and small HTTP body helpers so individual test
//! modules can focus on behaviour rather than boilerplate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use http_body_util::BodyExt;
use persona_mcp::config::{ConfigSources, GlobalConfig, StorageKind};
use persona_mcp::config_manager::ConfigManager;
use persona_mcp::mcp::engine::Engine;
use persona_mcp::mcp::protocol::Request;
use persona_mcp::registry::{Tool, ToolContext, ToolOutput, ToolRegistry, ToolSpec};
use persona_mcp::storage::{BoxFuture, Storage};
use persona_mcp::{tools, AppError, Result};
use serde_json::{json, Value};

/// Defaults with the in-memory storage backend.
pub fn test_config() -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.storage.kind = StorageKind::Memory;
    config
}

/// Config manager over a fixed configuration; reloads are not expected.
pub fn test_manager(config: GlobalConfig) -> Arc<ConfigManager> {
    Arc::new(ConfigManager::with_config(
        ConfigSources::file_only("persona-mcp-test-unused.yaml"),
        config,
    ))
}

/// Registry with the built-in tools plus `extra`.
pub fn test_registry(manager: &Arc<ConfigManager>, extra: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut builder = ToolRegistry::builder();
    tools::register_builtin(&mut builder).expect("built-in tools register");
    for tool in extra {
        builder.register(tool).expect("probe tool registers");
    }
    Arc::new(
        builder
            .build(Arc::clone(manager), Storage::in_memory())
            .expect("registry builds"),
    )
}

/// Engine over [`test_registry`].
pub fn test_engine(config: GlobalConfig, extra: Vec<Arc<dyn Tool>>) -> Engine {
    let manager = test_manager(config);
    let registry = test_registry(&manager, extra);
    Engine::new(registry, manager)
}

/// `initialize` request with the given id.
pub fn initialize(id: i64) -> Request {
    Request::new(
        id,
        "initialize",
        json!({
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "test-client", "version": "1.0"},
            "capabilities": {}
        }),
    )
}

/// `tools/call` request with the given id.
pub fn call(id: i64, name: &str, arguments: Value) -> Request {
    Request::new(id, "tools/call", json!({"name": name, "arguments": arguments}))
}

/// Context for calling the registry directly.
pub fn tool_context(registry: &ToolRegistry) -> ToolContext {
    ToolContext {
        session_id: "test-session".into(),
        request_id: None,
        cancel: tokio_util::sync::CancellationToken::new(),
        storage: registry.storage().clone(),
    }
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

/// Tool that sleeps and records how many invocations overlapped.
pub struct ProbeTool {
    spec: ToolSpec,
    delay: Duration,
    active: AtomicUsize,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl ProbeTool {
    /// Probe named `name` in `category`, sleeping `delay` per call.
    pub fn new(name: &str, category: &str, delay: Duration) -> Self {
        Self {
            spec: ToolSpec::new(name, "test probe", json!({"type": "object"})).category(category),
            delay,
            active: AtomicUsize::new(0),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allow overlapping calls.
    #[must_use]
    pub fn reentrant(mut self) -> Self {
        self.spec = self.spec.reentrant();
        self
    }

    /// Allow memoization.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.spec = self.spec.cacheable();
        self
    }

    /// Highest number of simultaneous invocations observed.
    pub fn peak(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }

    /// Number of invocations that actually ran.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Tool for ProbeTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, _ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolOutput::json(&json!({ "echo": args })))
        })
    }
}

/// Tool that panics on every call.
pub struct PanicTool {
    spec: ToolSpec,
}

impl PanicTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new("panic_probe", "always panics", json!({"type": "object"})),
        }
    }
}

impl Tool for PanicTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, _ctx: &'a ToolContext, _args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            let output: Result<ToolOutput> = panic!("probe panic");
            output
        })
    }
}

/// Tool that fails with a plain error.
pub struct FailingTool {
    spec: ToolSpec,
}

impl FailingTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new("failing_probe", "always fails", json!({"type": "object"})),
        }
    }
}

impl Tool for FailingTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, _ctx: &'a ToolContext, _args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move { Err(AppError::Storage("disk on fire".into())) })
    }
}
