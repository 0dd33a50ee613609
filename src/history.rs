// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! History management for undo support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::operations::is_cross_device;
use crate::{ArborError, Result};

/// Kind of committed file operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Move,
    Rename,
}

/// A single committed operation in history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    /// Display path of the category the file ended up in
    pub category: Option<String>,
    #[serde(default)]
    pub undone: bool,
}

/// Outcome of undoing one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    Undone,
    WouldUndo,
    /// The filed copy no longer exists
    Missing,
    /// Something already occupies the original location
    Occupied,
    /// Putting the file back failed; the entry stays undoable
    Failed(String),
}

/// Append-only JSONL log of moves and renames
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    /// Create a new history manager
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append an entry to the history
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all history entries
    pub fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Failed to parse history entry: {}", e);
                }
            }
        }

        Ok(entries)
    }

    /// Get the most recent N entries (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.read_all()?;
        entries.reverse();
        entries.truncate(count);
        Ok(entries)
    }

    /// Mark an entry as undone
    pub fn mark_undone(&self, id: &str) -> Result<()> {
        let entries = self.read_all()?;

        let file = File::create(&self.path)?;
        let mut writer = std::io::BufWriter::new(file);

        for mut entry in entries {
            if entry.id == id {
                entry.undone = true;
            }
            let json = serde_json::to_string(&entry)?;
            writeln!(writer, "{}", json)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Get entries that haven't been undone (oldest first)
    pub fn get_undoable(&self) -> Result<Vec<HistoryEntry>> {
        let entries = self.read_all()?;
        Ok(entries.into_iter().filter(|e| !e.undone).collect())
    }

    /// Reverse the newest `count` undoable entries, most recent first
    pub fn undo(&self, count: usize, dry_run: bool) -> Result<Vec<(HistoryEntry, UndoOutcome)>> {
        let to_undo: Vec<_> = self.get_undoable()?.into_iter().rev().take(count).collect();
        let mut outcomes = Vec::with_capacity(to_undo.len());

        for entry in to_undo {
            let outcome = if !entry.new_path.exists() {
                tracing::warn!("File not found (may have been moved/deleted): {:?}", entry.new_path);
                UndoOutcome::Missing
            } else if entry.original_path.exists() {
                tracing::warn!("Original location is occupied: {:?}", entry.original_path);
                UndoOutcome::Occupied
            } else if dry_run {
                UndoOutcome::WouldUndo
            } else {
                match put_back(&entry.new_path, &entry.original_path) {
                    Ok(()) => {
                        if let Err(e) = self.mark_undone(&entry.id) {
                            tracing::warn!("Restored {:?} but could not update history: {}", entry.original_path, e);
                        }
                        UndoOutcome::Undone
                    }
                    Err(e) => {
                        tracing::warn!("Could not undo {:?}: {}", entry.new_path, e);
                        UndoOutcome::Failed(e.to_string())
                    }
                }
            };
            outcomes.push((entry, outcome));
        }

        Ok(outcomes)
    }

    /// Clear all history
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Get history file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Move `from` back to `to`, copying across filesystems when a rename cannot
fn put_back(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| ArborError::operation("create", parent, e))?;
    }

    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) if is_cross_device(&e) => {}
        Err(e) => return Err(ArborError::operation("restore", from, e)),
    }

    if let Err(e) = fs::copy(from, to) {
        let _ = fs::remove_file(to);
        return Err(ArborError::operation("copy", from, e));
    }
    fs::remove_file(from).map_err(|cause| ArborError::PartialMove {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        cause,
    })
}

/// Create a new history entry
pub fn create_entry(
    action: HistoryAction,
    original_path: PathBuf,
    new_path: PathBuf,
    category: Option<String>,
) -> HistoryEntry {
    HistoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        action,
        original_path,
        new_path,
        category,
        undone: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_read_and_undo() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path().join("data").join("history.jsonl"));
        let original = dir.path().join("inbox").join("notes.pdf");
        let filed = dir.path().join("notes.pdf");
        fs::write(&filed, b"x").unwrap();

        history
            .append(&create_entry(
                HistoryAction::Move,
                original.clone(),
                filed.clone(),
                Some("Sem - 3/CN".to_string()),
            ))
            .unwrap();
        assert_eq!(history.get_recent(10).unwrap().len(), 1);

        let dry = history.undo(1, true).unwrap();
        assert_eq!(dry[0].1, UndoOutcome::WouldUndo);
        assert!(filed.exists());

        let done = history.undo(1, false).unwrap();
        assert_eq!(done[0].1, UndoOutcome::Undone);
        assert!(original.exists());
        assert!(!filed.exists());
        assert!(history.get_undoable().unwrap().is_empty());
        assert!(history.read_all().unwrap()[0].undone);
    }

    #[test]
    fn undo_skips_missing_and_occupied() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));
        let occupied = dir.path().join("a.txt");
        let filed = dir.path().join("b.txt");
        fs::write(&occupied, b"a").unwrap();
        fs::write(&filed, b"b").unwrap();

        history
            .append(&create_entry(HistoryAction::Rename, dir.path().join("gone-orig"), dir.path().join("gone"), None))
            .unwrap();
        history
            .append(&create_entry(HistoryAction::Rename, occupied.clone(), filed.clone(), None))
            .unwrap();

        let outcomes: Vec<_> = history.undo(5, false).unwrap().into_iter().map(|(_, o)| o).collect();
        assert_eq!(outcomes, vec![UndoOutcome::Occupied, UndoOutcome::Missing]);
        assert!(filed.exists());
    }

    #[test]
    fn failed_entry_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));
        let first = dir.path().join("first.pdf");
        fs::write(&first, b"1").unwrap();
        // A regular file where the original directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let second = dir.path().join("second.pdf");
        fs::write(&second, b"2").unwrap();

        let back = dir.path().join("inbox").join("first.pdf");
        history
            .append(&create_entry(HistoryAction::Move, back.clone(), first.clone(), None))
            .unwrap();
        history
            .append(&create_entry(HistoryAction::Move, blocker.join("second.pdf"), second.clone(), None))
            .unwrap();

        let outcomes = history.undo(5, false).unwrap();

        assert!(matches!(outcomes[0].1, UndoOutcome::Failed(_)));
        assert_eq!(outcomes[1].1, UndoOutcome::Undone);
        assert!(second.exists());
        assert!(back.exists());
        assert!(!first.exists());

        let left = history.get_undoable().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].new_path, second);
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));
        history
            .append(&create_entry(HistoryAction::Move, "a".into(), "b".into(), None))
            .unwrap();

        history.clear().unwrap();

        assert!(!history.path().exists());
        assert!(history.read_all().unwrap().is_empty());
    }
}
