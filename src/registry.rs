// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Registry of files already filed, keyed by name and modification time

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

use crate::Result;

/// Files whose mtime differs by less than this are considered unchanged
const MTIME_TOLERANCE_SECS: f64 = 1.0;

pub struct ProcessedRegistry {
    path: PathBuf,
    entries: BTreeMap<String, f64>,
}

impl ProcessedRegistry {
    /// Load the registry. A missing or unreadable file starts empty.
    pub fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Could not parse processed files registry {:?}: {}", path, e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Could not read processed files registry {:?}: {}", path, e);
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    /// Whether a file with this name and mtime has been filed before
    pub fn is_processed(&self, file: &Path, meta: &Metadata) -> bool {
        let (Some(name), Some(mtime)) = (file_key(file), mtime_secs(meta)) else {
            return false;
        };
        self.entries
            .get(&name)
            .map(|recorded| (recorded - mtime).abs() < MTIME_TOLERANCE_SECS)
            .unwrap_or(false)
    }

    /// Remember a filed file and persist the registry
    pub fn mark(&mut self, file: &Path, meta: &Metadata) -> Result<()> {
        if let (Some(name), Some(mtime)) = (file_key(file), mtime_secs(meta)) {
            self.entries.insert(name, mtime);
            self.save()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}

fn file_key(file: &Path) -> Option<String> {
    file.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn mtime_secs(meta: &Metadata) -> Option<f64> {
    meta.modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}
