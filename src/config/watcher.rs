//! Configuration file watcher for hot reload.
//!
//! Editors rarely write a file in place: many write a temporary file and
//! rename it over the original, which replaces the inode a per-file watch
//! is attached to. The watcher therefore watches the parent directory, keeps
//! only events naming the config file, and waits for a burst of events to
//! settle before reading the file once.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::IngressConfig;

/// Quiet period after the last event before the file is read.
const SETTLE: Duration = Duration::from_millis(250);

/// Monitors the configuration file and emits every valid new version.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<IngressConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<IngressConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);

        let (touched_tx, touched_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if names_file(&event, file_name.as_deref()) => {
                    let _ = touched_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tokio::spawn(reload_loop(self.path.clone(), touched_rx, self.update_tx));

        tracing::info!(path = %self.path.display(), dir = %dir.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Whether `event` creates, rewrites or renames onto the watched file.
fn names_file(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    relevant && event.paths.iter().any(|p| p.file_name() == file_name)
}

async fn reload_loop(
    path: PathBuf,
    mut touched: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<IngressConfig>,
) {
    while touched.recv().await.is_some() {
        tokio::time::sleep(SETTLE).await;
        let mut coalesced = 1;
        while touched.try_recv().is_ok() {
            coalesced += 1;
        }

        tracing::info!(path = %path.display(), events = coalesced, "Config file change detected, reloading");
        match load_config(&path) {
            Ok(config) => {
                if updates.send(config).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            }
        }
    }
}
