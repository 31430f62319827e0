//! Configuration file watcher for hot reload.
//!
//! Only pool membership is applied live. Changes to anything else are
//! reported and wait for a restart.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

/// Watches the configuration file and publishes every valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    current: ProxyConfig,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    /// `current` is the configuration the process started with.
    pub fn new(path: &Path, current: ProxyConfig) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive for as long as
    /// updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut current,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(next) if next == current => {}
                        Ok(next) => {
                            warn_restart_only_changes(&current, &next);
                            tracing::info!(backends = next.backends.len(), "Configuration reloaded");
                            current = next.clone();
                            if update_tx.send(next).is_err() {
                                tracing::debug!("No consumer for configuration updates");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}

/// Sections that are read once at startup.
fn restart_only_changes(current: &ProxyConfig, next: &ProxyConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if current.listener != next.listener {
        changed.push("listener");
    }
    if current.retries != next.retries {
        changed.push("retries");
    }
    if current.timeouts != next.timeouts {
        changed.push("timeouts");
    }
    if current.observability != next.observability {
        changed.push("observability");
    }
    changed
}

fn warn_restart_only_changes(current: &ProxyConfig, next: &ProxyConfig) {
    let changed = restart_only_changes(current, next);
    if !changed.is_empty() {
        tracing::warn!(sections = ?changed, "Changed sections take effect after a restart");
    }
}
