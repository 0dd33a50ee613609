// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Merging classification results into the category tree

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tree::{CategoryId, CategoryTree};

/// Main category used when the classifier reports none
pub const DEFAULT_MAIN_CATEGORY: &str = "unknown";

/// Subcategory used when the classifier reports none
pub const DEFAULT_SUBCATEGORY: &str = "Unknown";

/// Labels reported by the classification service for one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default)]
    pub main_category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<Subcategory>,
}

/// The subcategory field is either one label or a list of candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subcategory {
    One(String),
    Many(Vec<String>),
}

impl Subcategory {
    /// The label used for filing. Only the first candidate of a list is
    /// consulted; a single classification never files into several places.
    pub fn first(&self) -> Option<&str> {
        match self {
            Subcategory::One(label) => Some(label.as_str()),
            Subcategory::Many(labels) => labels.first().map(String::as_str),
        }
    }
}

impl ClassificationResult {
    pub fn new(main_category: Option<&str>, subcategory: Option<Subcategory>) -> Self {
        Self {
            main_category: main_category.map(String::from),
            subcategory,
        }
    }

    /// Main label after normalization
    pub fn main_label(&self) -> String {
        self.main_category
            .as_deref()
            .and_then(sanitize_label)
            .unwrap_or_else(|| DEFAULT_MAIN_CATEGORY.to_string())
    }

    /// Subcategory label after normalization
    pub fn sub_label(&self) -> String {
        self.subcategory
            .as_ref()
            .and_then(Subcategory::first)
            .and_then(sanitize_label)
            .unwrap_or_else(|| DEFAULT_SUBCATEGORY.to_string())
    }
}

/// Categories a classification result resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merged {
    pub main: CategoryId,
    pub sub: CategoryId,
    /// Number of nodes inserted by this merge (0..=2)
    pub created: usize,
}

/// Resolve the (main, sub) pair named by `result`, creating either node if
/// it does not exist yet. The main category is searched among the root's
/// immediate children only.
pub fn merge(tree: &mut CategoryTree, result: &ClassificationResult) -> Merged {
    let main_label = result.main_label();
    let sub_label = result.sub_label();
    let before = tree.len();

    let root = tree.root();
    let main = tree.find_category_by_name(root, &main_label);
    let sub = tree.find_or_create_child(main, &sub_label);

    let created = tree.len() - before;
    if created > 0 {
        info!("New category: {}", tree.display_path(sub));
    } else {
        debug!("Resolved existing category: {}", tree.display_path(sub));
    }

    Merged { main, sub, created }
}

/// Turn a raw label into something usable as one directory name.
///
/// Path separators and control characters are dropped; `None` is returned
/// when nothing usable remains.
pub fn sanitize_label(raw: &str) -> Option<String> {
    let clean: String = raw
        .chars()
        .filter(|c| !matches!(c, '/' | '\\') && !c.is_control())
        .collect();
    let clean = clean.trim();

    match clean {
        "" | "." | ".." => None,
        _ => Some(clean.to_string()),
    }
}
