// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Arbor

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::merger::sanitize_label;
use crate::tree::CategoryTree;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Root directory of the category tree
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Inbox directories watched for new files
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<String>,

    /// Where history, the processed-file registry and the tree snapshot live
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Classification service
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Initial categories, created at startup in this order
    #[serde(default = "default_taxonomy")]
    pub taxonomy: Vec<TaxonomyEntry>,

    /// Filing rules
    #[serde(default)]
    pub rules: RuleConfig,

    /// Inbox watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Largest accepted `classifier.retries`
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    pub url: String,
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: u32,
}

/// One top-level category and its subcategories
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TaxonomyEntry {
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleConfig {
    /// Append a timestamp instead of failing when the destination exists
    #[serde(default = "default_true")]
    pub rename_on_conflict: bool,
    /// Extensions (without dot) accepted from the inbox; empty accepts all
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    /// Glob patterns matched against file names that are never filed
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Delay before the first stability check of a new file
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Longest time to wait for a file to stop growing
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

// Default value functions
fn default_base_dir() -> String { "~/Desktop/Subjects".to_string() }
fn default_watch_paths() -> Vec<String> { vec!["~/Downloads".to_string()] }
fn default_data_dir() -> String { ".arbor".to_string() }
fn default_classifier_url() -> String { "http://127.0.0.1:5000/upload".to_string() }
fn default_field_name() -> String { "file".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_true() -> bool { true }
fn default_max_file_size_mb() -> u64 { 100 }
fn default_settle_secs() -> u64 { 2 }
fn default_max_wait_secs() -> u64 { 30 }

fn default_supported_extensions() -> Vec<String> {
    vec!["pdf", "docx", "pptx", "jpg", "jpeg", "png", "py", "ipynb", "c", "lex"]
        .into_iter().map(String::from).collect()
}

fn default_ignore_patterns() -> Vec<String> {
    vec!["*.crdownload", "*.part", "*.tmp", "~$*"]
        .into_iter().map(String::from).collect()
}

fn default_taxonomy() -> Vec<TaxonomyEntry> {
    vec![
        TaxonomyEntry {
            name: "Sem - 3".to_string(),
            subcategories: vec!["CN", "DMGT", "DSA", "CAO", "MPMC"]
                .into_iter().map(String::from).collect(),
        },
        TaxonomyEntry {
            name: "Sem - 2".to_string(),
            subcategories: vec!["DSD", "EE"].into_iter().map(String::from).collect(),
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            watch_paths: default_watch_paths(),
            data_dir: default_data_dir(),
            classifier: ClassifierConfig::default(),
            taxonomy: default_taxonomy(),
            rules: RuleConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: default_classifier_url(),
            field_name: default_field_name(),
            timeout_secs: default_timeout(),
            retries: 0,
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            rename_on_conflict: true,
            supported_extensions: default_supported_extensions(),
            ignore_patterns: default_ignore_patterns(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl RuleConfig {
    /// Whether the file name passes the extension and ignore filters
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        let ignored = self.ignore_patterns.iter().any(|p| {
            glob::Pattern::new(p)
                .map(|pattern| pattern.matches(name))
                .unwrap_or(false)
        });
        if ignored {
            return false;
        }

        if self.supported_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.supported_extensions.iter().any(|s| s.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::ArborError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would break the directory layout
    pub fn validate(&self) -> crate::Result<()> {
        if self.base_dir.trim().is_empty() {
            return Err(crate::ArborError::Config("base_dir must not be empty".to_string()));
        }
        if self.classifier.retries > MAX_RETRIES {
            return Err(crate::ArborError::Config(format!(
                "classifier.retries must be at most {}, got {}",
                MAX_RETRIES, self.classifier.retries
            )));
        }
        for entry in &self.taxonomy {
            for name in std::iter::once(&entry.name).chain(&entry.subcategories) {
                if sanitize_label(name).as_deref() != Some(name.as_str()) {
                    return Err(crate::ArborError::Config(format!(
                        "Invalid category name in taxonomy: {:?}",
                        name
                    )));
                }
            }
        }
        for pattern in &self.rules.ignore_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                crate::ArborError::Config(format!("Invalid ignore pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }

    pub fn base_path(&self) -> PathBuf {
        expand_home(&self.base_dir)
    }

    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        self.watch_paths.iter().map(|p| expand_home(p)).collect()
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_path().join("history.jsonl")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_path().join("processed_files.json")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_path().join("categories.json")
    }

    /// Build the startup tree: root plus the configured taxonomy
    pub fn initial_tree(&self) -> CategoryTree {
        let root_name = self
            .base_path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("Categories")
            .to_string();

        let mut tree = CategoryTree::new(&root_name);
        let root = tree.root();
        for entry in &self.taxonomy {
            let main = tree.find_or_create_child(root, &entry.name);
            for sub in &entry.subcategories {
                tree.find_or_create_child(main, sub);
            }
        }
        tree
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with(['/', '\\']) => {
            PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']))
        }
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: AppConfig = serde_json::from_str(r#"{"base_dir": "/srv/subjects"}"#).unwrap();

        assert_eq!(config.base_path(), PathBuf::from("/srv/subjects"));
        assert_eq!(config.classifier.field_name, "file");
        assert_eq!(config.classifier.retries, 0);
        assert_eq!(config.taxonomy.len(), 2);
        assert!(config.rules.rename_on_conflict);
    }

    #[test]
    fn initial_tree_follows_taxonomy() {
        let config = AppConfig {
            base_dir: "/srv/Subjects".to_string(),
            ..AppConfig::default()
        };
        let tree = config.initial_tree();

        assert_eq!(tree.get(tree.root()).name(), "Subjects");
        let sem3 = tree.lookup("Sem - 3").unwrap();
        let names: Vec<_> = tree.children(sem3).iter().map(|&c| tree.get(c).name()).collect();
        assert_eq!(names, vec!["CN", "DMGT", "DSA", "CAO", "MPMC"]);
        assert!(tree.lookup("Sem - 2/EE").is_some());
    }

    #[test]
    fn rules_filter_by_extension_and_pattern() {
        let rules = RuleConfig::default();

        assert!(rules.accepts(Path::new("/in/notes.PDF")));
        assert!(rules.accepts(Path::new("/in/lab.py")));
        assert!(!rules.accepts(Path::new("/in/movie.mkv")));
        assert!(!rules.accepts(Path::new("/in/paper.pdf.crdownload")));
        assert!(!rules.accepts(Path::new("/in/~$draft.docx")));

        let open = RuleConfig { supported_extensions: Vec::new(), ..RuleConfig::default() };
        assert!(open.accepts(Path::new("/in/anything.bin")));
    }

    #[test]
    fn validation_rejects_path_like_names() {
        let mut config = AppConfig::default();
        config.taxonomy.push(TaxonomyEntry {
            name: "a/b".to_string(),
            subcategories: vec![],
        });
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rules.ignore_patterns.push("[".to_string());
        assert!(config.validate().is_err());

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn validation_bounds_retries() {
        let mut config = AppConfig::default();
        config.classifier.retries = MAX_RETRIES;
        assert!(config.validate().is_ok());

        config.classifier.retries = 100;
        assert!(matches!(config.validate(), Err(crate::ArborError::Config(_))));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.base_dir = "/srv/x".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.base_dir, "/srv/x");
        assert_eq!(loaded.taxonomy, config.taxonomy);

        let missing = AppConfig::load(&dir.path().join("none.json")).unwrap();
        assert_eq!(missing.base_dir, default_base_dir());
    }

    #[test]
    fn home_is_expanded() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/Downloads"), PathBuf::from(home).join("Downloads"));
        }
    }
}
