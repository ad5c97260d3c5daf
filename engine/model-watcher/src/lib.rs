//! Checkpoint watcher for hot-reloading the serving model.
//!
//! A stand-alone web process serves weights written by a separate trainer.
//! This crate watches the checkpoint directory and, whenever the metadata
//! file changes, loads the checkpoint into a fresh approximator and hands it
//! to [`Coordinator::publish_serving`], which health-checks it before the
//! swap.
//!
//! # Polling Fallback
//!
//! Besides inotify, a polling task compares the metadata file's modification
//! time on an interval. inotify events do not reliably cross container
//! boundaries on bind-mounted volumes.
//!
//! # Example
//!
//! ```ignore
//! let watcher = CheckpointWatcher::new("./data/checkpoints", spec, coordinator);
//! watcher.try_load_existing()?;
//! let mut rx = watcher.start_watching().await?;
//! while let Some(steps) = rx.recv().await {
//!     println!("serving v{steps}");
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use candle_core::Device;
use learner::{CheckpointStore, Coordinator, ModelSpec};
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEBOUNCE: Duration = Duration::from_millis(500);
/// Grace period after a change event so the writer can finish its renames.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct CheckpointWatcher {
    checkpoints: CheckpointStore,
    spec: ModelSpec,
    device: Device,
    coordinator: Arc<Coordinator>,
    /// Modification time of the metadata file at the last load attempt.
    last_mtime: Arc<RwLock<Option<SystemTime>>>,
    poll_interval: Duration,
}

impl CheckpointWatcher {
    pub fn new(checkpoint_dir: impl AsRef<Path>, spec: ModelSpec, coordinator: Arc<Coordinator>) -> Self {
        Self {
            checkpoints: CheckpointStore::new(checkpoint_dir),
            spec,
            device: Device::Cpu,
            coordinator,
            last_mtime: Arc::new(RwLock::new(None)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn meta_path(&self) -> PathBuf {
        self.checkpoints.meta_path()
    }

    /// Load the checkpoint if one exists. `Ok(false)` when there is none.
    pub fn try_load_existing(&self) -> Result<bool> {
        if !self.checkpoints.exists() {
            debug!(dir = %self.checkpoints.dir().display(), "No existing checkpoint");
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    /// Load the current checkpoint and publish it. Returns its training
    /// steps.
    pub fn reload(&self) -> Result<u64> {
        let mtime = self.meta_path().metadata().and_then(|m| m.modified()).ok();
        {
            let mut guard = self
                .last_mtime
                .write()
                .map_err(|e| anyhow!("Failed to acquire last_mtime write lock: {}", e))?;
            *guard = mtime;
        }

        let (net, meta) = self
            .checkpoints
            .load_network(&self.spec, &self.device)
            .with_context(|| format!("Failed to load checkpoint from {:?}", self.checkpoints.dir()))?;
        let steps = meta.training_steps;
        if !self.coordinator.publish_serving(Arc::from(net), steps) {
            return Err(anyhow!("Checkpoint at step {} failed the health check", steps));
        }
        info!(steps, "Checkpoint reloaded");
        Ok(steps)
    }

    fn changed_since_last_load(&self) -> Option<bool> {
        let current = self.meta_path().metadata().and_then(|m| m.modified()).ok()?;
        let last = self.last_mtime.read().ok()?;
        Some(match *last {
            Some(last) => current > last,
            None => true,
        })
    }

    /// Spawn the inotify task and the polling task.
    ///
    /// Returns a channel that receives the training steps of every
    /// checkpoint that was published.
    pub async fn start_watching(&self) -> Result<mpsc::Receiver<u64>> {
        let (tx, rx) = mpsc::channel(16);
        let dir = self.checkpoints.dir().to_path_buf();

        let (fs_tx, mut fs_rx) = mpsc::channel(100);
        let mut watcher = recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let _ = fs_tx.blocking_send(event);
                }
                Err(e) => warn!("File watcher error: {}", e),
            }
        })
        .map_err(|e| anyhow!("Failed to create file watcher: {}", e))?;

        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create checkpoint directory {:?}", dir))?;
        }
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow!("Failed to watch directory: {}", e))?;
        info!(dir = %dir.display(), "Watching for checkpoint updates");

        let notify_self = self.clone();
        let notify_tx = tx.clone();
        tokio::spawn(async move {
            let _watcher = watcher;
            let meta_name = notify_self.meta_path().file_name().map(|n| n.to_os_string());
            let mut last_reload = Instant::now() - DEBOUNCE;

            while let Some(event) = fs_rx.recv().await {
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => {}
                    _ => continue,
                }
                let is_meta = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == meta_name);
                if !is_meta {
                    continue;
                }
                if last_reload.elapsed() < DEBOUNCE {
                    debug!("Debouncing checkpoint reload event");
                    continue;
                }
                tokio::time::sleep(SETTLE_DELAY).await;
                if !notify_self.checkpoints.exists() {
                    continue;
                }

                info!("Checkpoint metadata changed (inotify), reloading");
                match notify_self.reload() {
                    Ok(steps) => {
                        last_reload = Instant::now();
                        let _ = notify_tx.send(steps).await;
                    }
                    Err(e) => error!("Failed to reload checkpoint (inotify): {:#}", e),
                }
            }
        });

        let poll_self = self.clone();
        tokio::spawn(async move {
            info!(interval = ?poll_self.poll_interval, "Started checkpoint polling fallback");
            let mut interval = tokio::time::interval(poll_self.poll_interval);
            interval.tick().await;

            loop {
                interval.tick().await;
                match poll_self.changed_since_last_load() {
                    Some(true) => {}
                    Some(false) => continue,
                    None => {
                        debug!("Polling: no checkpoint metadata yet");
                        continue;
                    }
                }
                tokio::time::sleep(SETTLE_DELAY).await;

                info!("Checkpoint metadata changed (polling), reloading");
                match poll_self.reload() {
                    Ok(steps) => {
                        if tx.send(steps).await.is_err() {
                            debug!("Checkpoint listener dropped, stopping polling");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to reload checkpoint (polling): {:#}", e),
                }
            }
        });

        Ok(rx)
    }
}
