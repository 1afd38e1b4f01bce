#![forbid(unsafe_code)]

//! `persona-mcp`: MCP protocol server binary.
//!
//! Loads configuration, opens the storage backend, builds the tool registry
//! and serves the configured transport until SIGINT/SIGTERM (or stdin EOF
//! on stdio).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

use persona_mcp::config::{CliOverrides, ConfigSources, LogFormat, TransportKind};
use persona_mcp::config_manager::ConfigManager;
use persona_mcp::config_watcher::{spawn_signal_reload, ConfigWatcher};
use persona_mcp::mcp::engine::Engine;
use persona_mcp::mcp::http::{serve_http, HttpState};
use persona_mcp::mcp::stdio::serve_stdio;
use persona_mcp::registry::ToolRegistry;
use persona_mcp::storage::Storage;
use persona_mcp::{tools, AppError, GlobalConfig, Result};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Parser)]
#[command(name = "persona-mcp", about = "MCP protocol server", version, long_about = None)]
struct Cli {
    /// Transport binding (overrides `transport.type`).
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// Bind host for the HTTP transports.
    #[arg(long)]
    host: Option<String>,

    /// Bind port for the HTTP transports.
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file (YAML or TOML). Defaults to `./config.yaml` when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging and internal error detail in responses.
    #[arg(long)]
    debug: bool,

    /// Log output format.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            debug: self.debug,
            log_format: self.log_format,
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let sources = ConfigSources::new(args.config.clone(), args.overrides());
    let config_path = sources.path.clone();
    let manager = Arc::new(ConfigManager::load(sources)?);
    let filter = init_tracing(&manager.current())?;
    info!(path = ?config_path, "persona-mcp bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(manager, config_path, filter))
}

async fn run(manager: Arc<ConfigManager>, config_path: Option<PathBuf>, filter: FilterHandle) -> Result<()> {
    let config = manager.current();

    // ── Storage and registry ────────────────────────────
    let storage = Storage::connect(&config.storage).await?;
    let mut builder = ToolRegistry::builder();
    tools::register_builtin(&mut builder)?;
    let registry = Arc::new(builder.build(Arc::clone(&manager), storage)?);
    info!(tools = registry.list().await.len(), "tool registry ready");

    // ── Background services ─────────────────────────────
    let ct = CancellationToken::new();
    let mut background = registry.spawn_background(&ct);
    background.push(spawn_signal_reload(Arc::clone(&manager), ct.clone()));
    background.push(spawn_log_follower(&manager, filter, ct.clone()));

    let _watcher = match config_path {
        Some(ref path) => match ConfigWatcher::new(path, Arc::clone(&manager)) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(%err, "config file watcher unavailable; reload via SIGHUP or admin only");
                None
            }
        },
        None => None,
    };

    // ── Transport ───────────────────────────────────────
    let engine = Engine::new(registry, Arc::clone(&manager));
    let kind = config.transport.kind;
    let server_ct = ct.clone();
    let mut server = tokio::spawn(async move {
        match kind {
            TransportKind::Stdio => serve_stdio(engine, server_ct).await,
            TransportKind::Sse | TransportKind::HttpStream => {
                serve_http(HttpState::new(engine, server_ct)).await
            }
        }
    });
    info!(transport = kind.as_str(), "MCP server ready");

    // ── Wait for shutdown ───────────────────────────────
    let outcome = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            (&mut server).await
        }
        joined = &mut server => {
            ct.cancel();
            joined
        }
    };

    for handle in background {
        if let Err(err) = handle.await {
            warn!(%err, "background task ended abnormally");
        }
    }

    let result = outcome.map_err(|err| AppError::Transport(format!("server task failed: {err}")))?;
    if let Err(ref err) = result {
        error!(%err, "transport failed");
    }
    info!("persona-mcp shut down");
    result
}

/// Re-apply the log filter whenever a reload changes the level.
fn spawn_log_follower(
    manager: &ConfigManager,
    filter: FilterHandle,
    ct: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut updates = manager.subscribe();
    tokio::spawn(async move {
        let mut level = updates.borrow().config.log_level().to_owned();
        loop {
            tokio::select! {
                () = ct.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = updates.borrow_and_update().config.log_level().to_owned();
                    if next == level {
                        continue;
                    }
                    match filter.reload(EnvFilter::new(&next)) {
                        Ok(()) => info!(level = %next, "log level updated"),
                        Err(err) => warn!(%err, "failed to update log level"),
                    }
                    level = next;
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over the configured level
/// at startup unless debug mode is on.
fn init_tracing(config: &GlobalConfig) -> Result<FilterHandle> {
    let env_filter = if config.server.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()))
    };
    let (filter, handle) = reload::Layer::new(env_filter);

    let output = match config.logging.format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

    Ok(handle)
}
