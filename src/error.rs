// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Arbor

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Arbor operations
pub type Result<T> = std::result::Result<T, ArborError>;

/// Arbor error types
#[derive(Error, Debug)]
pub enum ArborError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Failed to {action} {path:?}: {cause}")]
    Operation {
        action: &'static str,
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    /// Copy succeeded but the source could not be removed; the file now
    /// exists at both locations.
    #[error("Partial move: {from:?} was copied to {to:?} but could not be removed: {cause}")]
    PartialMove {
        from: PathBuf,
        to: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("Destination already exists: {0:?}")]
    AlreadyExists(PathBuf),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("{path:?} is not in category {category}")]
    OutsideCategory { path: PathBuf, category: String },

    #[error("Deletion of {0:?} was not confirmed")]
    DeleteNotConfirmed(PathBuf),

    #[error("Category tree is inconsistent: {0}")]
    StructuralViolation(String),

    #[error("Sort worker has stopped")]
    WorkerStopped,
}

impl ArborError {
    pub(crate) fn operation(action: &'static str, path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        Self::Operation {
            action,
            path: path.into(),
            cause,
        }
    }

    /// True for the copy-then-delete failure that leaves a duplicate behind
    pub fn is_partial_move(&self) -> bool {
        matches!(self, Self::PartialMove { .. })
    }

    /// True when the failure came from the classification collaborator
    pub fn is_classification(&self) -> bool {
        matches!(self, Self::Classification(_) | Self::Api(_))
    }
}
