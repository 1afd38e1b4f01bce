//! Directory scan producing template tools and prompt resources.
//!
//! | Pattern                      | Produces                              |
//! |------------------------------|---------------------------------------|
//! | `**/*.yaml`, `*.yml`, `*.toml` | [`TemplateTool`] from a tool manifest |
//! | `**/*.md`                    | [`PromptFile`] at `prompt://<relpath>`  |
//!
//! YAML/TOML files that are not tool manifests (no `name` or `template`) are
//! skipped with a debug log; prompt content lives alongside manifests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::resources::{PromptFile, Resource};
use super::tool::{Tool, ToolContext, ToolOutput, ToolSpec};
use crate::mcp::schema;
use crate::storage::BoxFuture;
use crate::{AppError, Result};

/// Category assigned to discovered tools that do not name one.
pub const TEMPLATE_CATEGORY: &str = "prompt";

/// Tool manifest file contents.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateManifest {
    /// Tool name.
    pub name: String,
    /// Summary shown in `tools/list`.
    #[serde(default)]
    pub description: String,
    /// Category for enablement and timeouts.
    #[serde(default)]
    pub category: Option<String>,
    /// Argument schema.
    #[serde(default = "default_schema")]
    pub input_schema: Value,
    /// Text with `{{argument}}` placeholders.
    pub template: String,
    /// Allow overlapping calls.
    #[serde(default)]
    pub reentrant: bool,
    /// Allow memoization.
    #[serde(default)]
    pub cacheable: bool,
}

fn default_schema() -> Value {
    json!({"type": "object"})
}

/// Tool that renders a text template from its arguments.
#[derive(Debug, Clone)]
pub struct TemplateTool {
    spec: ToolSpec,
    template: String,
    source: PathBuf,
}

impl TemplateTool {
    /// Build from a parsed manifest.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty name or invalid schema.
    pub fn from_manifest(manifest: TemplateManifest, source: PathBuf) -> Result<Self> {
        if manifest.name.trim().is_empty() {
            return Err(AppError::Config(format!(
                "tool manifest {} has an empty name",
                source.display()
            )));
        }
        schema::check_schema(&manifest.input_schema).map_err(|err| {
            AppError::Config(format!("tool manifest {}: {err}", source.display()))
        })?;
        let mut spec = ToolSpec::new(manifest.name, manifest.description, manifest.input_schema)
            .category(manifest.category.unwrap_or_else(|| TEMPLATE_CATEGORY.into()));
        if manifest.reentrant {
            spec = spec.reentrant();
        }
        if manifest.cacheable {
            spec = spec.cacheable();
        }
        Ok(Self {
            spec,
            template: manifest.template,
            source,
        })
    }

    /// Manifest the tool was loaded from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Substitute `{{key}}` with argument values; strings are inserted raw,
/// other values as JSON. Unknown placeholders are left as written.
#[must_use]
pub fn render_template(template: &str, args: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match args.get(name) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

impl Tool for TemplateTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn invoke<'a>(&'a self, _ctx: &'a ToolContext, args: Value) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move { Ok(ToolOutput::text(render_template(&self.template, &args))) })
    }
}

/// Everything one discovery pass found.
#[derive(Default)]
pub struct Discovered {
    /// Template tools.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Prompt file resources.
    pub resources: Vec<Arc<dyn Resource>>,
}

impl std::fmt::Debug for Discovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovered")
            .field("tools", &self.tools.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Scan `directories` recursively.
///
/// # Errors
///
/// Returns `AppError::DuplicateTool` when two manifests share a name,
/// `AppError::Config` for an invalid manifest schema or glob pattern.
pub fn discover(directories: &[PathBuf]) -> Result<Discovered> {
    let mut found = Discovered::default();
    let mut names = HashSet::new();
    let mut uris = HashSet::new();

    for dir in directories {
        for path in scan(dir, &["yaml", "yml", "toml"])? {
            let Some(manifest) = read_manifest(&path)? else {
                continue;
            };
            let tool = TemplateTool::from_manifest(manifest, path.clone())?;
            if !names.insert(tool.spec.name.clone()) {
                return Err(AppError::DuplicateTool(format!(
                    "{} (again in {})",
                    tool.spec.name,
                    path.display()
                )));
            }
            debug!(tool = %tool.spec.name, path = %path.display(), "discovered tool manifest");
            found.tools.push(Arc::new(tool));
        }

        for path in scan(dir, &["md"])? {
            let relative = relative_name(dir, &path);
            let resource = PromptFile::new(&relative, path.clone());
            if !uris.insert(resource.descriptor().uri.clone()) {
                warn!(path = %path.display(), "duplicate prompt uri skipped");
                continue;
            }
            found.resources.push(Arc::new(resource));
        }
    }

    info!(
        tools = found.tools.len(),
        resources = found.resources.len(),
        "discovery complete"
    );
    Ok(found)
}

fn scan(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for ext in extensions {
        let pattern = dir.join("**").join(format!("*.{ext}"));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|err| AppError::Config(format!("invalid discovery pattern {pattern}: {err}")))?;
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(err) => warn!(%err, "unreadable path skipped during discovery"),
            }
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_manifest(path: &Path) -> Result<Option<TemplateManifest>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::Io(format!("failed to read {}: {err}", path.display())))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let parsed = if is_toml {
        toml::from_str::<TemplateManifest>(&raw).map_err(|err| err.to_string())
    } else {
        serde_yaml::from_str::<TemplateManifest>(&raw).map_err(|err| err.to_string())
    };
    match parsed {
        Ok(manifest) => Ok(Some(manifest)),
        Err(err) => {
            debug!(path = %path.display(), %err, "not a tool manifest; skipped");
            Ok(None)
        }
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
