//! Explicit registration of built-in tools and resources.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use super::discovery;
use super::resources::Resource;
use super::tool::Tool;
use super::{Catalog, Origin, ToolRegistry};
use crate::config_manager::ConfigManager;
use crate::mcp::schema;
use crate::storage::Storage;
use crate::{AppError, Result};

/// Collects tools before the registry is built.
#[derive(Default)]
pub struct RegistryBuilder {
    tools: Vec<Arc<dyn Tool>>,
    resources: Vec<Arc<dyn Resource>>,
    names: HashSet<String>,
    uris: HashSet<String>,
}

impl RegistryBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in tool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateTool` if the name is taken and
    /// `AppError::Config` if its input schema is malformed.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<&mut Self> {
        let spec = tool.spec();
        if !self.names.insert(spec.name.clone()) {
            return Err(AppError::DuplicateTool(spec.name.clone()));
        }
        schema::check_schema(&spec.input_schema)
            .map_err(|err| AppError::Config(format!("tool {}: {err}", spec.name)))?;
        self.tools.push(tool);
        Ok(self)
    }

    /// Register a resource.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URI is already registered.
    pub fn register_resource(&mut self, resource: Arc<dyn Resource>) -> Result<&mut Self> {
        let uri = resource.descriptor().uri.clone();
        if !self.uris.insert(uri.clone()) {
            return Err(AppError::Config(format!("duplicate resource uri: {uri}")));
        }
        self.resources.push(resource);
        Ok(self)
    }

    /// Number of tools registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run discovery when enabled, apply config-driven enablement and build.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateTool` when a discovered tool collides with
    /// a built-in or another discovered tool. Callers treat this as fatal.
    pub fn build(self, config: Arc<ConfigManager>, storage: Storage) -> Result<ToolRegistry> {
        let current = config.current();
        let discovered = if current.tools.auto_discover {
            discovery::discover(&current.tools.directories)?
        } else {
            discovery::Discovered::default()
        };

        let mut catalog = Catalog::default();
        for tool in self.tools {
            catalog.insert_tool(tool, Origin::Builtin);
        }
        for resource in self.resources {
            catalog.insert_resource(resource, Origin::Builtin);
        }
        catalog.replace_discovered(discovered)?;
        catalog.apply_config(&current.tools);

        info!(
            tools = catalog.tool_count(),
            resources = catalog.resource_count(),
            "tool registry built"
        );
        Ok(ToolRegistry::from_catalog(config, storage, catalog))
    }
}
