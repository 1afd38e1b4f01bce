//! Hot-reload triggers for the configuration file.
//!
//! [`ConfigWatcher`] uses the `notify` crate to watch the directory holding
//! the config file and asks the [`ConfigManager`] to reload on every change
//! to that file. [`spawn_signal_reload`] does the same for `SIGHUP`.
//!
//! Reloads are all-or-nothing: a file saved in a broken state is rejected and
//! the previous snapshot stays active until the next valid save.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config_manager::ConfigManager;
use crate::{AppError, Result};

/// Returns `true` for events that write, replace or remove `config_path`.
fn is_config_change(event: &Event, config_path: &Path) -> bool {
    let file_name = config_path.file_name();
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name().is_some() && p.file_name() == file_name)
}

/// File-system watcher that triggers config reloads.
///
/// Dropping a `ConfigWatcher` stops the underlying OS watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Start watching `config_path`, reloading `manager` on change.
    ///
    /// Must be called from within a tokio runtime; reloads run on it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the `notify` watcher cannot be created
    /// or the directory cannot be watched.
    pub fn new(config_path: &Path, manager: Arc<ConfigManager>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|err| AppError::Config(format!("config watcher needs a runtime: {err}")))?;
        let path_for_callback = config_path.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_config_change(&event, &path_for_callback) => {
                    let manager = Arc::clone(&manager);
                    let path = path_for_callback.clone();
                    runtime.spawn(async move {
                        if let Err(err) = manager.reload().await {
                            warn!(%err, path = %path.display(), "config file change rejected");
                        }
                    });
                }
                Err(err) => {
                    warn!(%err, "config file watcher error");
                }
                _ => {}
            },
        )
        .map_err(|err| AppError::Config(format!("failed to create config file watcher: {err}")))?;

        // Watch the parent directory so rename-based saves are seen.
        let watch_target = config_path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or_else(|| Path::new("."));

        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Config(format!(
                    "failed to watch config path '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %config_path.display(), "config watcher started");

        Ok(Self {
            _watcher: watcher,
            path: config_path.to_path_buf(),
        })
    }

    /// File being watched.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reload the configuration whenever the process receives `SIGHUP`.
#[cfg(unix)]
#[must_use]
pub fn spawn_signal_reload(manager: Arc<ConfigManager>, ct: CancellationToken) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "failed to register SIGHUP handler; signal reload disabled");
                return;
            }
        };
        loop {
            tokio::select! {
                () = ct.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received; reloading config");
                    if let Err(err) = manager.reload().await {
                        warn!(%err, "signal-triggered reload rejected");
                    }
                }
            }
        }
    })
}

/// Signal reload is unavailable off unix; the task completes immediately.
#[cfg(not(unix))]
#[must_use]
pub fn spawn_signal_reload(_manager: Arc<ConfigManager>, _ct: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async {})
}
