//! Authoritative configuration snapshot and atomic hot reload.
//!
//! [`ConfigManager`] owns the live [`GlobalConfig`]. Readers receive
//! `Arc<GlobalConfig>` snapshots that never change underneath them; a reload
//! builds a complete new snapshot and only publishes it once it validates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::config::{ConfigSources, GlobalConfig};
use crate::Result;

/// Published configuration plus bookkeeping.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Starts at 1 and increments on every successful reload.
    pub generation: u64,
    /// When this snapshot was published.
    pub loaded_at: DateTime<Utc>,
}

/// Outcome of the most recent reload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadStatus {
    /// No reload has been attempted yet.
    Never,
    /// The last reload published the given generation.
    Applied(u64),
    /// The last reload failed; the previous snapshot stayed active.
    Rejected(String),
}

/// Owner of the active configuration snapshot.
#[derive(Debug)]
pub struct ConfigManager {
    sources: ConfigSources,
    tx: watch::Sender<ConfigSnapshot>,
    generation: AtomicU64,
    last_reload: std::sync::Mutex<ReloadStatus>,
    reload_lock: Mutex<()>,
}

impl ConfigManager {
    /// Load the initial snapshot from `sources`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the initial configuration is invalid;
    /// callers treat this as fatal.
    pub fn load(sources: ConfigSources) -> Result<Self> {
        let config = GlobalConfig::load(&sources)?;
        Ok(Self::with_config(sources, config))
    }

    /// Wrap an already validated configuration.
    #[must_use]
    pub fn with_config(sources: ConfigSources, config: GlobalConfig) -> Self {
        let snapshot = ConfigSnapshot {
            config: Arc::new(config),
            generation: 1,
            loaded_at: Utc::now(),
        };
        let (tx, _rx) = watch::channel(snapshot);
        Self {
            sources,
            tx,
            generation: AtomicU64::new(1),
            last_reload: std::sync::Mutex::new(ReloadStatus::Never),
            reload_lock: Mutex::new(()),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn current(&self) -> Arc<GlobalConfig> {
        Arc::clone(&self.tx.borrow().config)
    }

    /// Current configuration plus its generation.
    #[must_use]
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every successful reload.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConfigSnapshot> {
        self.tx.subscribe()
    }

    /// Outcome of the most recent reload attempt.
    #[must_use]
    pub fn last_reload(&self) -> ReloadStatus {
        self.last_reload
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Rebuild the configuration from the original sources and swap it in.
    ///
    /// Concurrent reloads are serialised. On failure the active snapshot is
    /// untouched and the error is returned and remembered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the new configuration does not load or
    /// validate.
    pub async fn reload(&self) -> Result<ConfigSnapshot> {
        let _guard = self.reload_lock.lock().await;

        let config = match GlobalConfig::load(&self.sources) {
            Ok(config) => config,
            Err(err) => {
                warn!(%err, "config reload rejected; keeping previous snapshot");
                self.record(ReloadStatus::Rejected(err.to_string()));
                return Err(err);
            }
        };

        let previous = self.current();
        for section in config.restart_required_changes(&previous) {
            warn!(section, "config section changed; takes effect after restart");
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = ConfigSnapshot {
            config: Arc::new(config),
            generation,
            loaded_at: Utc::now(),
        };
        self.tx.send_replace(snapshot.clone());
        self.record(ReloadStatus::Applied(generation));
        info!(generation, "config reloaded");
        Ok(snapshot)
    }

    fn record(&self, status: ReloadStatus) {
        *self
            .last_reload
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = status;
    }
}
