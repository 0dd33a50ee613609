// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inbox watcher feeding newly arrived files to the sorter

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::config::RuleConfig;
use crate::Result;

/// Events emitted by the watcher
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A new file was created
    FileCreated(PathBuf),
    /// A file was renamed into place (e.g. a finished download)
    FileRenamed(PathBuf),
    /// Watcher error
    Error(String),
}

impl WatchEvent {
    /// Path of a file that has just appeared, if this event announces one
    pub fn arrival(&self) -> Option<&Path> {
        match self {
            WatchEvent::FileCreated(path) | WatchEvent::FileRenamed(path) => Some(path),
            WatchEvent::Error(_) => None,
        }
    }
}

/// Watches inbox directories (non-recursively)
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: UnboundedReceiver<notify::Result<Event>>,
}

impl FileWatcher {
    /// Create a new file watcher
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded_channel();

        let config = Config::default().with_poll_interval(Duration::from_secs(2));

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Receiver gone means we are shutting down
                let _ = tx.send(res);
            },
            config,
        )?;

        Ok(Self {
            watcher,
            event_rx: rx,
        })
    }

    /// Add a directory to watch
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        // Create directory if it doesn't exist
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            info!("Created watch directory: {:?}", path);
        }

        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        info!("Watching: {:?}", path);

        Ok(())
    }

    /// Next relevant event; `None` once the underlying watcher is gone
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        loop {
            match self.event_rx.recv().await? {
                Ok(event) => {
                    if let Some(converted) = Self::convert_event(event) {
                        return Some(converted);
                    }
                }
                Err(e) => return Some(WatchEvent::Error(e.to_string())),
            }
        }
    }

    /// Only arrivals matter: creations and renames into a watched directory
    fn convert_event(event: Event) -> Option<WatchEvent> {
        let mut paths = event.paths.into_iter();
        match event.kind {
            EventKind::Create(_) => paths.next().map(WatchEvent::FileCreated),
            // Both carries [from, to]
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => paths.nth(1).map(WatchEvent::FileRenamed),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths.next().map(WatchEvent::FileRenamed),
            _ => None,
        }
    }
}

/// Check if a newly arrived file should be sorted at all
pub fn should_process(path: &Path, rules: &RuleConfig) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if filename.starts_with('.') {
        return false;
    }

    // Skip unfinished downloads
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    if skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n)) {
        return false;
    }

    rules.accepts(path)
}

/// Wait until the file's size stops changing. Returns false if the file
/// disappeared; proceeds anyway once `max_wait` has passed.
pub async fn wait_for_stable(path: &Path, settle: Duration, max_wait: Duration) -> bool {
    let start = std::time::Instant::now();

    let mut last_size = match tokio::fs::metadata(path).await {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        tokio::time::sleep(settle).await;

        let current_size = match tokio::fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        if current_size == last_size {
            return true;
        }

        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true;
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}
