//! Global configuration types, layered loading, and validation.
//!
//! A [`GlobalConfig`] is assembled from built-in defaults, an optional
//! `config.yaml` (or `.toml`) file, `MCP_*` environment overrides and CLI
//! flags, in that order, and validated as a unit before anyone sees it.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Schema version accepted in `config_version`.
pub const CONFIG_VERSION: u32 = 1;

/// Default file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Longest accepted `tools.cache_ttl_seconds` (one year).
pub const MAX_CACHE_TTL_SECONDS: u64 = 365 * 86_400;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Wire transport binding.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Newline-delimited or length-prefixed JSON over stdin/stdout.
    #[default]
    Stdio,
    /// Server-Sent Events stream plus a POST endpoint per session.
    Sse,
    /// Bidirectional NDJSON over one streaming HTTP request.
    #[serde(alias = "http_stream")]
    HttpStream,
}

impl TransportKind {
    /// Whether sessions on this transport must `initialize` before anything else.
    #[must_use]
    pub fn requires_initialize(self) -> bool {
        !matches!(self, Self::Stdio)
    }

    /// Stable lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::HttpStream => "http-stream",
        }
    }
}

/// Embedded storage engine selection.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Process-local maps; nothing survives a restart.
    Memory,
    /// Embedded `SQLite` document store.
    #[default]
    Document,
    /// Document store with embedding validation and similarity queries.
    Vector,
}

/// Log output format.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable compact lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// `server` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Name reported in `initialize` results.
    pub name: String,
    /// Version reported in `initialize` results.
    pub version: String,
    /// Bearer token guarding the admin endpoints; admin routes are off when unset.
    pub admin_token: Option<String>,
    /// Debug mode: verbose logs and internal detail in error `data`.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            admin_token: None,
            debug: false,
        }
    }
}

/// `transport` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct TransportConfig {
    /// Active binding.
    #[serde(rename = "type")]
    pub kind: TransportKind,
    /// Bind address for the HTTP transports.
    pub host: String,
    /// Bind port for the HTTP transports; `0` picks an ephemeral port.
    pub port: u16,
    /// Largest accepted inbound frame.
    pub max_frame_bytes: usize,
    /// Interval between SSE keep-alive comments.
    pub sse_keepalive_seconds: u64,
    /// Per-session buffer of inbound frames and outbound replies.
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            host: "127.0.0.1".into(),
            port: 3000,
            max_frame_bytes: 4 * 1024 * 1024,
            sse_keepalive_seconds: 15,
            channel_capacity: 64,
        }
    }
}

/// `storage` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct StorageConfig {
    /// Backend engine.
    #[serde(rename = "type")]
    pub kind: StorageKind,
    /// Database file for persistent backends.
    pub path: PathBuf,
    /// Expected embedding length for the vector backend.
    pub vector_dimensions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Document,
            path: PathBuf::from("data/persona-mcp.db"),
            vector_dimensions: 384,
        }
    }
}

/// `tools` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct ToolsConfig {
    /// Master switch; when off, no tool is listed or callable.
    pub enabled: bool,
    /// Scan `directories` for tool manifests and prompt files.
    pub auto_discover: bool,
    /// Directories scanned by discovery.
    pub directories: Vec<PathBuf>,
    /// Tool names disabled by configuration.
    pub disabled: Vec<String>,
    /// Categories disabled by configuration.
    pub disabled_categories: Vec<String>,
    /// Timeout applied when a category has no explicit entry.
    pub default_timeout_seconds: u64,
    /// Per-category invocation timeouts.
    pub category_timeouts: HashMap<String, u64>,
    /// Lifetime of memoized results for cacheable tools; `0` disables caching.
    pub cache_ttl_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_discover: false,
            directories: Vec::new(),
            disabled: Vec::new(),
            disabled_categories: Vec::new(),
            default_timeout_seconds: 30,
            category_timeouts: HashMap::new(),
            cache_ttl_seconds: 0,
        }
    }
}

/// `logging` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct LoggingConfig {
    /// `EnvFilter` level: trace, debug, info, warn or error.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Schema version; must equal [`CONFIG_VERSION`].
    pub config_version: u32,
    /// Identity and admin settings.
    pub server: ServerConfig,
    /// Transport binding.
    pub transport: TransportConfig,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Tool discovery, enablement and execution limits.
    pub tools: ToolsConfig,
    /// Log level and format.
    pub logging: LoggingConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            server: ServerConfig::default(),
            transport: TransportConfig::default(),
            storage: StorageConfig::default(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Environment variable overrides, captured once per load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// `MCP_TRANSPORT_TYPE`
    pub transport: Option<String>,
    /// `MCP_HOST`
    pub host: Option<String>,
    /// `MCP_PORT`
    pub port: Option<String>,
    /// `MCP_STORAGE_TYPE`
    pub storage_type: Option<String>,
    /// `MCP_STORAGE_PATH`
    pub storage_path: Option<String>,
    /// `MCP_LOG_LEVEL`
    pub log_level: Option<String>,
    /// `MCP_LOG_FORMAT`
    pub log_format: Option<String>,
    /// `MCP_ADMIN_TOKEN`
    pub admin_token: Option<String>,
}

impl EnvOverrides {
    /// Capture the `MCP_*` variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_pairs(env::vars())
    }

    /// Build overrides from explicit key/value pairs; unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = Self::default();
        for (key, value) in pairs {
            let value: String = value.into();
            let value = value.trim().to_owned();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "MCP_TRANSPORT_TYPE" => &mut overrides.transport,
                "MCP_HOST" => &mut overrides.host,
                "MCP_PORT" => &mut overrides.port,
                "MCP_STORAGE_TYPE" => &mut overrides.storage_type,
                "MCP_STORAGE_PATH" => &mut overrides.storage_path,
                "MCP_LOG_LEVEL" => &mut overrides.log_level,
                "MCP_LOG_FORMAT" => &mut overrides.log_format,
                "MCP_ADMIN_TOKEN" => &mut overrides.admin_token,
                _ => continue,
            };
            *slot = Some(value);
        }
        overrides
    }

    fn apply(&self, config: &mut GlobalConfig) -> Result<()> {
        if let Some(ref raw) = self.transport {
            config.transport.kind = TransportKind::from_str(raw, true)
                .map_err(|_| AppError::Config(format!("MCP_TRANSPORT_TYPE invalid: {raw}")))?;
        }
        if let Some(ref host) = self.host {
            config.transport.host.clone_from(host);
        }
        if let Some(ref raw) = self.port {
            config.transport.port = raw
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("MCP_PORT must be a valid u16: {raw}")))?;
        }
        if let Some(ref raw) = self.storage_type {
            config.storage.kind = StorageKind::from_str(raw, true)
                .map_err(|_| AppError::Config(format!("MCP_STORAGE_TYPE invalid: {raw}")))?;
        }
        if let Some(ref path) = self.storage_path {
            config.storage.path = PathBuf::from(path);
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.to_ascii_lowercase();
        }
        if let Some(ref raw) = self.log_format {
            config.logging.format = LogFormat::from_str(raw, true)
                .map_err(|_| AppError::Config(format!("MCP_LOG_FORMAT invalid: {raw}")))?;
        }
        if let Some(ref token) = self.admin_token {
            config.server.admin_token = Some(token.clone());
        }
        Ok(())
    }
}

/// Where environment overrides come from on each (re)load.
#[derive(Debug, Clone)]
pub enum EnvSource {
    /// Read the process environment at load time.
    Process,
    /// Use a fixed set of overrides.
    Fixed(EnvOverrides),
}

impl EnvSource {
    fn snapshot(&self) -> EnvOverrides {
        match self {
            Self::Process => EnvOverrides::from_env(),
            Self::Fixed(overrides) => overrides.clone(),
        }
    }
}

/// Explicit runtime overrides from command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    /// `--transport`
    pub transport: Option<TransportKind>,
    /// `--host`
    pub host: Option<String>,
    /// `--port`
    pub port: Option<u16>,
    /// `--debug`
    pub debug: bool,
    /// `--log-format`
    pub log_format: Option<LogFormat>,
}

impl CliOverrides {
    fn apply(&self, config: &mut GlobalConfig) {
        if let Some(kind) = self.transport {
            config.transport.kind = kind;
        }
        if let Some(ref host) = self.host {
            config.transport.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if self.debug {
            config.server.debug = true;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

/// Every input needed to (re)build a configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    /// Config file; `None` means defaults plus overrides only.
    pub path: Option<PathBuf>,
    /// Environment overrides.
    pub env: EnvSource,
    /// CLI overrides.
    pub cli: CliOverrides,
}

impl ConfigSources {
    /// Sources for a process: optional explicit path, live environment, CLI flags.
    ///
    /// Without an explicit path, `config.yaml` in the working directory is used
    /// when it exists.
    #[must_use]
    pub fn new(path: Option<PathBuf>, cli: CliOverrides) -> Self {
        let path = path.or_else(|| {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            fallback.is_file().then_some(fallback)
        });
        Self {
            path,
            env: EnvSource::Process,
            cli,
        }
    }

    /// Sources that read only the given file with no overrides.
    #[must_use]
    pub fn file_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            env: EnvSource::Fixed(EnvOverrides::default()),
            cli: CliOverrides::default(),
        }
    }
}

impl GlobalConfig {
    /// Run the full layered load and validate the result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or parsed, an
    /// override is malformed, or validation fails.
    pub fn load(sources: &ConfigSources) -> Result<Self> {
        let mut config = match sources.path {
            Some(ref path) => {
                let mut parsed = Self::parse_file(path)?;
                parsed.resolve_relative_paths(path.parent().unwrap_or_else(|| Path::new("")));
                parsed
            }
            None => Self::default(),
        };

        sources.env.snapshot().apply(&mut config)?;
        sources.cli.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a single file with no overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid YAML/TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(&ConfigSources::file_only(path.as_ref()))
    }

    /// Parse configuration from a YAML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Ok(toml::from_str(&raw)?)
        } else if raw.trim().is_empty() {
            Ok(Self::default())
        } else {
            Ok(serde_yaml::from_str(&raw)?)
        }
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        if base.as_os_str().is_empty() {
            return;
        }
        for dir in &mut self.tools.directories {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        if self.storage.path.is_relative() {
            self.storage.path = base.join(&self.storage.path);
        }
    }

    /// Check the structure as a whole.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.config_version != CONFIG_VERSION {
            return Err(AppError::Config(format!(
                "unsupported config_version {} (expected {CONFIG_VERSION})",
                self.config_version
            )));
        }
        if self.server.name.trim().is_empty() {
            return Err(AppError::Config("server.name must not be empty".into()));
        }
        if self.server.version.trim().is_empty() {
            return Err(AppError::Config("server.version must not be empty".into()));
        }
        if self.transport.host != "localhost" && self.transport.host.parse::<IpAddr>().is_err() {
            return Err(AppError::Config(format!(
                "transport.host is not a valid address: {}",
                self.transport.host
            )));
        }
        if self.transport.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "transport.max_frame_bytes must be greater than zero".into(),
            ));
        }
        if self.transport.channel_capacity == 0 {
            return Err(AppError::Config(
                "transport.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.transport.sse_keepalive_seconds == 0 {
            return Err(AppError::Config(
                "transport.sse_keepalive_seconds must be greater than zero".into(),
            ));
        }
        if self.storage.kind != StorageKind::Memory && self.storage.path.as_os_str().is_empty() {
            return Err(AppError::Config(
                "storage.path is required for persistent backends".into(),
            ));
        }
        if self.storage.kind == StorageKind::Vector && self.storage.vector_dimensions == 0 {
            return Err(AppError::Config(
                "storage.vector_dimensions must be greater than zero".into(),
            ));
        }
        if self.tools.default_timeout_seconds == 0 {
            return Err(AppError::Config(
                "tools.default_timeout_seconds must be greater than zero".into(),
            ));
        }
        if let Some((category, _)) = self
            .tools
            .category_timeouts
            .iter()
            .find(|(_, seconds)| **seconds == 0)
        {
            return Err(AppError::Config(format!(
                "tools.category_timeouts.{category} must be greater than zero"
            )));
        }
        if self.tools.cache_ttl_seconds > MAX_CACHE_TTL_SECONDS {
            return Err(AppError::Config(format!(
                "tools.cache_ttl_seconds must be at most {MAX_CACHE_TTL_SECONDS}, got {}",
                self.tools.cache_ttl_seconds
            )));
        }
        if self.tools.auto_discover {
            if let Some(missing) = self.tools.directories.iter().find(|dir| !dir.is_dir()) {
                return Err(AppError::Config(format!(
                    "tools.directories entry is not a directory: {}",
                    missing.display()
                )));
            }
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(AppError::Config(format!(
                "logging.level must be one of {LOG_LEVELS:?}, got {}",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Effective `EnvFilter` directive, honouring debug mode.
    #[must_use]
    pub fn log_level(&self) -> &str {
        if self.server.debug {
            "debug"
        } else {
            &self.logging.level
        }
    }

    /// Invocation timeout for a tool category.
    #[must_use]
    pub fn timeout_for(&self, category: &str) -> Duration {
        let seconds = self
            .tools
            .category_timeouts
            .get(category)
            .copied()
            .unwrap_or(self.tools.default_timeout_seconds);
        Duration::from_secs(seconds)
    }

    /// Memoization lifetime, or `None` when caching is off.
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.tools.cache_ttl_seconds > 0).then(|| Duration::from_secs(self.tools.cache_ttl_seconds))
    }

    /// Names of sections that changed relative to `previous` but only take
    /// effect after a restart.
    #[must_use]
    pub fn restart_required_changes(&self, previous: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.transport.kind != previous.transport.kind
            || self.transport.host != previous.transport.host
            || self.transport.port != previous.transport.port
        {
            changed.push("transport");
        }
        if self.storage != previous.storage {
            changed.push("storage");
        }
        changed
    }

    /// JSON view of the configuration with secrets masked.
    #[must_use]
    pub fn redacted(&self) -> serde_json::Value {
        let mut copy = self.clone();
        if copy.server.admin_token.is_some() {
            copy.server.admin_token = Some("[REDACTED]".into());
        }
        serde_json::to_value(copy).unwrap_or(serde_json::Value::Null)
    }
}
