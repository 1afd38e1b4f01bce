//! Catalog of tools and resources, and safe tool execution.
//!
//! The catalog sits behind a `tokio::sync::RwLock`: listing and calls take a
//! shared read, discovery and enable/disable take an exclusive write. Tool
//! invocations run on their own task with a per-category timeout, observe
//! the request's cancellation token, and are serialised per tool unless the
//! tool declares itself reentrant.

pub mod builder;
pub mod cache;
pub mod discovery;
pub mod resources;
pub mod tool;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::config::{GlobalConfig, ToolsConfig};
use crate::config_manager::ConfigManager;
use crate::storage::Storage;
use crate::{AppError, Result};

pub use builder::RegistryBuilder;
pub use cache::ResultCache;
pub use resources::{Resource, ResourceContents, ResourceDescriptor};
pub use tool::{ContentBlock, Tool, ToolContext, ToolOutput, ToolSpec};

/// Where a catalog entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Registered explicitly at startup.
    Builtin,
    /// Produced by a discovery pass; replaced on refresh.
    Discovered,
}

struct ToolEntry {
    tool: Arc<dyn Tool>,
    origin: Origin,
    lock: Arc<Mutex<()>>,
}

struct ResourceEntry {
    resource: Arc<dyn Resource>,
    origin: Origin,
}

/// Mutable catalog state guarded by the registry lock.
#[derive(Default)]
pub(crate) struct Catalog {
    tools: BTreeMap<String, ToolEntry>,
    resources: BTreeMap<String, ResourceEntry>,
    master_enabled: bool,
    disabled_tools: HashSet<String>,
    disabled_categories: HashSet<String>,
}

impl Catalog {
    pub(crate) fn insert_tool(&mut self, tool: Arc<dyn Tool>, origin: Origin) {
        let name = tool.spec().name.clone();
        self.tools.insert(
            name,
            ToolEntry {
                tool,
                origin,
                lock: Arc::new(Mutex::new(())),
            },
        );
    }

    pub(crate) fn insert_resource(&mut self, resource: Arc<dyn Resource>, origin: Origin) {
        let uri = resource.descriptor().uri.clone();
        self.resources.insert(uri, ResourceEntry { resource, origin });
    }

    pub(crate) fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub(crate) fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Swap the discovered set; nothing changes if any entry collides with a
    /// built-in.
    pub(crate) fn replace_discovered(&mut self, discovered: discovery::Discovered) -> Result<()> {
        for tool in &discovered.tools {
            let name = &tool.spec().name;
            if self
                .tools
                .get(name)
                .is_some_and(|entry| entry.origin == Origin::Builtin)
            {
                return Err(AppError::DuplicateTool(format!(
                    "{name} (discovered tool shadows a built-in)"
                )));
            }
        }
        for resource in &discovered.resources {
            let uri = &resource.descriptor().uri;
            if self
                .resources
                .get(uri)
                .is_some_and(|entry| entry.origin == Origin::Builtin)
            {
                return Err(AppError::Config(format!(
                    "discovered resource shadows a built-in: {uri}"
                )));
            }
        }

        self.tools.retain(|_, entry| entry.origin == Origin::Builtin);
        self.resources
            .retain(|_, entry| entry.origin == Origin::Builtin);
        for tool in discovered.tools {
            self.insert_tool(tool, Origin::Discovered);
        }
        for resource in discovered.resources {
            self.insert_resource(resource, Origin::Discovered);
        }
        Ok(())
    }

    /// Reset enablement to what the configuration says.
    pub(crate) fn apply_config(&mut self, tools: &ToolsConfig) {
        self.master_enabled = tools.enabled;
        self.disabled_tools = tools.disabled.iter().cloned().collect();
        self.disabled_categories = tools.disabled_categories.iter().cloned().collect();
    }

    fn is_enabled(&self, spec: &ToolSpec) -> bool {
        self.master_enabled
            && !self.disabled_tools.contains(&spec.name)
            && !self.disabled_categories.contains(&spec.category)
    }
}

/// A resolved, enabled tool ready to invoke.
#[derive(Clone)]
pub struct ToolHandle {
    tool: Arc<dyn Tool>,
    lock: Arc<Mutex<()>>,
}

impl ToolHandle {
    /// Static description of the tool.
    #[must_use]
    pub fn spec(&self) -> &ToolSpec {
        self.tool.spec()
    }
}

/// Admin view of one tool, enabled or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStatus {
    /// Tool name.
    pub name: String,
    /// Summary.
    pub description: String,
    /// Category.
    pub category: String,
    /// Whether `tools/list` shows it and `tools/call` reaches it.
    pub enabled: bool,
    /// Built-in or discovered.
    pub origin: Origin,
    /// Overlapping calls allowed.
    pub reentrant: bool,
    /// Results memoized.
    pub cacheable: bool,
}

/// Outcome of a discovery refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Tools in the catalog afterwards.
    pub tools: usize,
    /// Resources in the catalog afterwards.
    pub resources: usize,
}

/// Shared owner of the tool and resource catalog.
pub struct ToolRegistry {
    catalog: RwLock<Catalog>,
    config: Arc<ConfigManager>,
    storage: Storage,
    cache: Arc<ResultCache>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("storage", &self.storage)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Start registering tools.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn from_catalog(config: Arc<ConfigManager>, storage: Storage, catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            config,
            storage,
            cache: Arc::new(ResultCache::new()),
        }
    }

    /// Storage handle given to tools.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Memoized results.
    #[must_use]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Enabled tools in name order.
    pub async fn list(&self) -> Vec<ToolSpec> {
        let catalog = self.catalog.read().await;
        catalog
            .tools
            .values()
            .map(|entry| entry.tool.spec())
            .filter(|spec| catalog.is_enabled(spec))
            .cloned()
            .collect()
    }

    /// Every tool with its enablement, for administration.
    pub async fn statuses(&self) -> Vec<ToolStatus> {
        let catalog = self.catalog.read().await;
        catalog
            .tools
            .values()
            .map(|entry| {
                let spec = entry.tool.spec();
                ToolStatus {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    category: spec.category.clone(),
                    enabled: catalog.is_enabled(spec),
                    origin: entry.origin,
                    reentrant: spec.reentrant,
                    cacheable: spec.cacheable,
                }
            })
            .collect()
    }

    /// Look up an enabled tool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ToolNotFound` for unknown and disabled tools alike.
    pub async fn resolve(&self, name: &str) -> Result<ToolHandle> {
        let catalog = self.catalog.read().await;
        match catalog.tools.get(name) {
            Some(entry) if catalog.is_enabled(entry.tool.spec()) => Ok(ToolHandle {
                tool: Arc::clone(&entry.tool),
                lock: Arc::clone(&entry.lock),
            }),
            _ => Err(AppError::ToolNotFound(name.to_owned())),
        }
    }

    /// Run a resolved tool with timeout, cancellation, serialisation and
    /// memoization applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ToolExecution` when the tool fails or panics,
    /// `AppError::Timeout` past the category deadline and
    /// `AppError::Cancelled` when `ctx.cancel` fires first.
    pub async fn invoke(&self, handle: ToolHandle, args: Value, ctx: ToolContext) -> Result<ToolOutput> {
        let config = self.config.current();
        let spec = handle.spec().clone();
        let timeout = config.timeout_for(&spec.category);
        let ttl = config.cache_ttl().filter(|_| spec.cacheable);
        let cache_key = ttl.map(|_| cache::cache_key(&spec.name, &args));

        if let Some(ref key) = cache_key {
            if let Some(hit) = self.cache.get(key) {
                debug!(tool = %spec.name, "tool result served from cache");
                return Ok(hit);
            }
        }

        let cancel = ctx.cancel.clone();
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Err(AppError::Cancelled(format!("{} was cancelled", spec.name)))
            }
            result = tokio::time::timeout(timeout, run_isolated(handle, args, ctx)) => {
                result.unwrap_or_else(|_| {
                    Err(AppError::Timeout(format!(
                        "{} exceeded {}s",
                        spec.name,
                        timeout.as_secs()
                    )))
                })
            }
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(output) => {
                info!(tool = %spec.name, elapsed_ms, "tool call completed");
                if let (Some(key), Some(ttl)) = (cache_key, ttl) {
                    if !output.is_error {
                        self.cache.insert(key, output.clone(), ttl);
                    }
                }
                Ok(output)
            }
            Err(err) => {
                warn!(tool = %spec.name, elapsed_ms, %err, "tool call failed");
                Err(err)
            }
        }
    }

    /// Enable or disable one tool at runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no tool has that name.
    pub async fn set_tool_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut catalog = self.catalog.write().await;
        if !catalog.tools.contains_key(name) {
            return Err(AppError::NotFound(format!("tool {name}")));
        }
        if enabled {
            catalog.disabled_tools.remove(name);
        } else {
            catalog.disabled_tools.insert(name.to_owned());
        }
        info!(tool = name, enabled, "tool enablement changed");
        Ok(())
    }

    /// Enable or disable a whole category; returns how many tools it holds.
    pub async fn set_category_enabled(&self, category: &str, enabled: bool) -> usize {
        let mut catalog = self.catalog.write().await;
        if enabled {
            catalog.disabled_categories.remove(category);
        } else {
            catalog.disabled_categories.insert(category.to_owned());
        }
        let affected = catalog
            .tools
            .values()
            .filter(|entry| entry.tool.spec().category == category)
            .count();
        info!(category, enabled, affected, "category enablement changed");
        affected
    }

    /// Registered and discovered resources in URI order.
    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.catalog
            .read()
            .await
            .resources
            .values()
            .map(|entry| entry.resource.descriptor().clone())
            .collect()
    }

    /// Read a resource by URI; `storage://` URIs go straight to storage.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceNotFound` for unknown URIs.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents> {
        if uri.starts_with(resources::STORAGE_SCHEME) {
            return resources::read_storage_uri(&self.storage, uri).await;
        }
        let resource = self
            .catalog
            .read()
            .await
            .resources
            .get(uri)
            .map(|entry| Arc::clone(&entry.resource))
            .ok_or_else(|| AppError::ResourceNotFound(uri.to_owned()))?;
        resource.read().await
    }

    /// Re-run discovery and swap the discovered set atomically.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateTool` or `AppError::Config` when the new
    /// set is unusable; the previous catalog stays in place.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let config = self.config.current();
        let discovered = if config.tools.auto_discover {
            discovery::discover(&config.tools.directories)?
        } else {
            discovery::Discovered::default()
        };
        let mut catalog = self.catalog.write().await;
        catalog.replace_discovered(discovered)?;
        let summary = RefreshSummary {
            tools: catalog.tool_count(),
            resources: catalog.resource_count(),
        };
        info!(tools = summary.tools, resources = summary.resources, "tool catalog refreshed");
        Ok(summary)
    }

    /// Re-apply config-driven enablement; runtime toggles are discarded.
    pub async fn apply_config(&self, config: &GlobalConfig) {
        self.catalog.write().await.apply_config(&config.tools);
        if config.cache_ttl().is_none() {
            self.cache.clear();
        }
    }

    /// Spawn the cache sweeper and the config-reload follower.
    #[must_use]
    pub fn spawn_background(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let sweeper = cache::spawn_cache_sweeper(
            Arc::clone(&self.cache),
            cache::SWEEP_INTERVAL,
            cancel.clone(),
        );

        let registry = Arc::clone(self);
        let mut updates = self.config.subscribe();
        let cancel = cancel.clone();
        let follower = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = updates.borrow_and_update().clone();
                        registry.apply_config(&snapshot.config).await;
                        debug!(generation = snapshot.generation, "registry enablement re-applied");
                    }
                }
            }
        });

        vec![sweeper, follower]
    }
}

async fn run_isolated(handle: ToolHandle, args: Value, ctx: ToolContext) -> Result<ToolOutput> {
    let guard = if handle.spec().reentrant {
        None
    } else {
        Some(Arc::clone(&handle.lock).lock_owned().await)
    };
    let tool = handle.tool;
    let task = AbortOnDropHandle::new(tokio::spawn(async move {
        let _guard = guard;
        tool.invoke(&ctx, args).await
    }));

    match task.await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(as_execution_error(err)),
        Err(join) if join.is_panic() => Err(AppError::ToolExecution("tool panicked".into())),
        Err(_) => Err(AppError::Cancelled("tool task aborted".into())),
    }
}

fn as_execution_error(err: AppError) -> AppError {
    match err {
        AppError::ToolExecution(_) | AppError::Timeout(_) | AppError::Cancelled(_) => err,
        other => AppError::ToolExecution(other.to_string()),
    }
}
