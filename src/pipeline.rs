// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classify-and-file pipeline
//!
//! A [`Sorter`] owns the category tree and takes one file at a time through
//! classify, merge, resolve and move. [`spawn_worker`] puts a sorter behind
//! a queue so that files arriving from several places are still filed one
//! after another.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::ClassificationClient;
use crate::merger::merge;
use crate::operations::FileOperationsManager;
use crate::registry::ProcessedRegistry;
use crate::tree::CategoryTree;
use crate::{ArborError, Result};

/// Why a file was left alone before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    NotAFile,
    Empty,
    TooLarge(u64),
    AlreadyProcessed,
}

/// What happened to one file
#[derive(Debug)]
pub enum FileStatus {
    Filed { category: String, destination: PathBuf },
    /// Dry run: where the file would have gone
    Planned { category: String, destination: PathBuf },
    Skipped(SkipReason),
    ClassificationFailed(ArborError),
    /// The file now exists both at its old and its new location
    PartialMove(ArborError),
    Failed(ArborError),
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    pub elapsed: Duration,
}

impl FileReport {
    pub fn action(&self) -> &'static str {
        match self.status {
            FileStatus::Filed { .. } => "filed",
            FileStatus::Planned { .. } => "planned",
            FileStatus::Skipped(_) => "skipped",
            FileStatus::ClassificationFailed(_) => "classification-failed",
            FileStatus::PartialMove(_) => "partial-move",
            FileStatus::Failed(_) => "failed",
        }
    }

    pub fn category(&self) -> Option<&str> {
        match &self.status {
            FileStatus::Filed { category, .. } | FileStatus::Planned { category, .. } => Some(category),
            _ => None,
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        match &self.status {
            FileStatus::Filed { destination, .. } | FileStatus::Planned { destination, .. } => {
                Some(destination)
            }
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ArborError> {
        match &self.status {
            FileStatus::ClassificationFailed(e) | FileStatus::PartialMove(e) | FileStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let skip_reason = match self.status {
            FileStatus::Skipped(reason) => Some(format!("{:?}", reason)),
            _ => None,
        };
        serde_json::json!({
            "path": self.path.to_string_lossy(),
            "action": self.action(),
            "category": self.category(),
            "destination": self.destination().map(|d| d.to_string_lossy()),
            "skip_reason": skip_reason,
            "error": self.error().map(|e| e.to_string()),
            "elapsed_ms": self.elapsed.as_millis() as u64,
        })
    }
}

/// Reports for a batch, in submission order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    fn count(&self, action: &str) -> usize {
        self.files.iter().filter(|r| r.action() == action).count()
    }

    pub fn filed(&self) -> usize {
        self.count("filed") + self.count("planned")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.files.iter().filter(|r| r.error().is_some()).count()
    }
}

/// Owns the tree and files documents into it
pub struct Sorter<C> {
    tree: CategoryTree,
    operations: FileOperationsManager,
    classifier: C,
    registry: Option<ProcessedRegistry>,
    snapshot_path: Option<PathBuf>,
    max_file_size: u64,
    dry_run: bool,
}

impl<C: ClassificationClient> Sorter<C> {
    pub fn new(tree: CategoryTree, operations: FileOperationsManager, classifier: C) -> Self {
        Self {
            tree,
            operations,
            classifier,
            registry: None,
            snapshot_path: None,
            max_file_size: u64::MAX,
            dry_run: false,
        }
    }

    /// Skip files that were already filed with the same modification time
    pub fn with_registry(mut self, registry: ProcessedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Persist the category names here whenever a file is filed
    pub fn with_snapshot(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn tree(&self) -> &CategoryTree {
        &self.tree
    }

    pub fn into_tree(self) -> CategoryTree {
        self.tree
    }

    /// Take one file through the whole pipeline. Never fails: every outcome,
    /// including errors, ends up in the report.
    pub async fn process(&mut self, path: &Path) -> FileReport {
        let start = Instant::now();
        let status = self.run(path).await;
        let report = FileReport {
            path: path.to_path_buf(),
            status,
            elapsed: start.elapsed(),
        };

        let file = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let elapsed_ms = report.elapsed.as_millis() as u64;
        match report.error() {
            Some(e) => warn!(
                file = %file,
                action = report.action(),
                elapsed_ms,
                error = %e,
                "File result"
            ),
            None => info!(
                file = %file,
                category = report.category().unwrap_or("-"),
                action = report.action(),
                elapsed_ms,
                "File result"
            ),
        }

        report
    }

    pub async fn sort_batch(&mut self, paths: &[PathBuf]) -> BatchReport {
        let mut batch = BatchReport::default();
        for path in paths {
            batch.files.push(self.process(path).await);
        }
        batch
    }

    async fn run(&mut self, path: &Path) -> FileStatus {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return FileStatus::Skipped(SkipReason::Missing)
            }
            Err(e) => return FileStatus::Failed(ArborError::operation("inspect", path, e)),
        };
        if !meta.is_file() {
            return FileStatus::Skipped(SkipReason::NotAFile);
        }
        if meta.len() == 0 {
            return FileStatus::Skipped(SkipReason::Empty);
        }
        if meta.len() > self.max_file_size {
            return FileStatus::Skipped(SkipReason::TooLarge(meta.len()));
        }
        if let Some(registry) = &self.registry {
            if registry.is_processed(path, &meta) {
                return FileStatus::Skipped(SkipReason::AlreadyProcessed);
            }
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return FileStatus::Failed(ArborError::InvalidName(path.display().to_string()));
        };
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) => return FileStatus::Failed(ArborError::operation("read", path, e)),
        };

        debug!("Classifying {:?} ({} bytes)", path, content.len());
        let result = match self.classifier.classify(file_name, content).await {
            Ok(result) => result,
            Err(e) => return FileStatus::ClassificationFailed(e),
        };

        let merged = merge(&mut self.tree, &result);
        let category = self.tree.display_path(merged.sub);

        if self.dry_run {
            let destination = self.operations.resolver().resolve_file(&self.tree, merged.sub, file_name);
            return FileStatus::Planned { category, destination };
        }

        let source = self.tree.category_of_file(path);
        let status = match self.operations.move_file(&mut self.tree, path, source, merged.sub).await {
            Ok(record) => FileStatus::Filed {
                category,
                destination: record.destination.unwrap_or_else(|| path.to_path_buf()),
            },
            Err(e) if e.is_partial_move() => FileStatus::PartialMove(e),
            Err(e) => return FileStatus::Failed(e),
        };

        if let Some(registry) = &mut self.registry {
            if let Err(e) = registry.mark(path, &meta) {
                warn!("Could not update processed files registry: {}", e);
            }
        }
        self.save_snapshot();

        status
    }

    fn save_snapshot(&self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.tree.snapshot().save(path) {
                warn!("Could not save category snapshot to {:?}: {}", path, e);
            }
        }
    }
}

struct Job {
    path: PathBuf,
    reply: Option<oneshot::Sender<FileReport>>,
}

/// Handle for feeding files to a worker started with [`spawn_worker`]
#[derive(Clone)]
pub struct SortQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl SortQueue {
    /// Queue a file without waiting for it
    pub fn enqueue(&self, path: PathBuf) -> Result<()> {
        self.tx
            .send(Job { path, reply: None })
            .map_err(|_| ArborError::WorkerStopped)
    }

    /// Queue a file and wait for its report
    pub async fn submit(&self, path: PathBuf) -> Result<FileReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { path, reply: Some(reply) })
            .map_err(|_| ArborError::WorkerStopped)?;
        rx.await.map_err(|_| ArborError::WorkerStopped)
    }
}

/// Run `sorter` on its own task, processing queued files strictly in order.
///
/// The task ends once every [`SortQueue`] handle is dropped and hands the
/// sorter back, so the caller can inspect or persist the final tree.
pub fn spawn_worker<C>(mut sorter: Sorter<C>) -> (SortQueue, JoinHandle<Sorter<C>>)
where
    C: ClassificationClient + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let report = sorter.process(&job.path).await;
            if let Some(reply) = job.reply {
                // The submitter may have gone away; the file is filed regardless
                let _ = reply.send(report);
            }
        }
        debug!("Sort queue closed");
        sorter
    });

    (SortQueue { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::{ClassificationResult, Subcategory};
    use crate::paths::PathResolver;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    /// Answers by file name; unknown names fail classification
    struct ByName(Vec<(&'static str, &'static str, &'static str)>);

    #[async_trait]
    impl ClassificationClient for ByName {
        async fn classify(&self, file_name: &str, _content: Vec<u8>) -> Result<ClassificationResult> {
            self.0
                .iter()
                .find(|(name, _, _)| *name == file_name)
                .map(|(_, main, sub)| ClassificationResult::new(Some(*main), Some(Subcategory::One(sub.to_string()))))
                .ok_or_else(|| ArborError::Classification(format!("no label for {}", file_name)))
        }
    }

    /// Records the order in which files were classified
    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl ClassificationClient for Recording {
        async fn classify(&self, file_name: &str, _content: Vec<u8>) -> Result<ClassificationResult> {
            tokio::task::yield_now().await;
            if let Ok(mut seen) = self.0.lock() {
                seen.push(file_name.to_string());
            }
            Ok(ClassificationResult::new(Some("Sem - 3"), Some(Subcategory::One("CN".into()))))
        }
    }

    fn sorter<C: ClassificationClient>(base: &Path, classifier: C) -> Sorter<C> {
        let mut tree = CategoryTree::new("Subjects");
        let root = tree.root();
        let sem = tree.find_or_create_child(root, "Sem - 3");
        tree.find_or_create_child(sem, "CN");
        let operations = FileOperationsManager::new(PathResolver::new(base));
        Sorter::new(tree, operations, classifier)
    }

    fn inbox_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let inbox = dir.join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let path = inbox.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn files_into_existing_and_new_categories() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Subjects");
        let cn = inbox_file(dir.path(), "tcp.pdf", b"tcp");
        let ee = inbox_file(dir.path(), "ohm.pdf", b"ohm");
        let mut sorter = sorter(&base, ByName(vec![("tcp.pdf", "Sem - 3", "CN"), ("ohm.pdf", "Sem - 2", "EE")]));
        let before = sorter.tree().len();

        let batch = sorter.sort_batch(&[cn.clone(), ee.clone()]).await;

        assert_eq!(batch.filed(), 2);
        assert_eq!(batch.files[0].destination(), Some(base.join("Sem - 3/CN/tcp.pdf").as_path()));
        assert_eq!(batch.files[1].category(), Some("Sem - 2/EE"));
        assert!(base.join("Sem - 2/EE/ohm.pdf").exists());
        assert!(!cn.exists());
        assert_eq!(sorter.tree().len(), before + 2);

        let tree = sorter.tree();
        let ee_id = tree.lookup("Sem - 2/EE").unwrap();
        assert_eq!(tree.get(ee_id).files(), &[base.join("Sem - 2/EE/ohm.pdf")]);
        tree.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn classification_failure_leaves_file_and_continues_batch() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Subjects");
        let unknown = inbox_file(dir.path(), "mystery.bin", b"??");
        let known = inbox_file(dir.path(), "tcp.pdf", b"tcp");
        let mut sorter = sorter(&base, ByName(vec![("tcp.pdf", "Sem - 3", "CN")]));
        let before = sorter.tree().len();

        let batch = sorter.sort_batch(&[unknown.clone(), known]).await;

        assert!(matches!(batch.files[0].status, FileStatus::ClassificationFailed(_)));
        assert!(unknown.exists());
        assert_eq!(sorter.tree().len(), before);
        assert_eq!(batch.filed(), 1);
        assert_eq!(batch.failed(), 1);
    }

    #[tokio::test]
    async fn skips_before_classifying() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Subjects");
        let empty = inbox_file(dir.path(), "empty.pdf", b"");
        let big = inbox_file(dir.path(), "big.pdf", &[0u8; 64]);
        let mut sorter = sorter(&base, ByName(Vec::new())).with_max_file_size(32);

        let batch = sorter
            .sort_batch(&[empty, big, dir.path().join("gone.pdf"), dir.path().to_path_buf()])
            .await;

        let statuses: Vec<_> = batch.files.iter().map(|r| &r.status).collect();
        assert!(matches!(statuses[0], FileStatus::Skipped(SkipReason::Empty)));
        assert!(matches!(statuses[1], FileStatus::Skipped(SkipReason::TooLarge(64))));
        assert!(matches!(statuses[2], FileStatus::Skipped(SkipReason::Missing)));
        assert!(matches!(statuses[3], FileStatus::Skipped(SkipReason::NotAFile)));
        assert_eq!(batch.skipped(), 4);
    }

    #[tokio::test]
    async fn dry_run_plans_without_moving() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Subjects");
        let file = inbox_file(dir.path(), "tcp.pdf", b"tcp");
        let mut sorter = sorter(&base, ByName(vec![("tcp.pdf", "Sem - 3", "CN")])).with_dry_run(true);

        let report = sorter.process(&file).await;

        assert_eq!(report.action(), "planned");
        assert_eq!(report.destination(), Some(base.join("Sem - 3/CN/tcp.pdf").as_path()));
        assert!(file.exists());
        assert!(!base.exists());
    }

    #[tokio::test]
    async fn registry_and_snapshot_are_updated() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Subjects");
        let data = dir.path().join(".arbor");
        let file = inbox_file(dir.path(), "ohm.pdf", b"ohm");
        let meta = fs::metadata(&file).unwrap();
        let mut sorter = sorter(&base, ByName(vec![("ohm.pdf", "Sem - 2", "EE")]))
            .with_registry(ProcessedRegistry::load(data.join("processed_files.json")))
            .with_snapshot(data.join("categories.json"));

        assert_eq!(sorter.process(&file).await.action(), "filed");

        let registry = ProcessedRegistry::load(data.join("processed_files.json"));
        assert!(registry.is_processed(&file, &meta));
        let snapshot = crate::tree::CategorySnapshot::load(&data.join("categories.json"))
            .unwrap()
            .unwrap();
        let mut restored = CategoryTree::new("Subjects");
        restored.restore(&snapshot);
        assert!(restored.lookup("Sem - 2/EE").is_some());

        // Same name and mtime turning up again is not filed twice
        fs::write(&file, b"ohm").unwrap();
        let handle = fs::File::options().write(true).open(&file).unwrap();
        handle.set_modified(meta.modified().unwrap()).unwrap();
        let again = sorter.process(&file).await;
        assert!(matches!(again.status, FileStatus::Skipped(SkipReason::AlreadyProcessed)));
    }

    #[tokio::test]
    async fn queue_processes_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Subjects");
        let names = ["one.pdf", "two.pdf", "three.pdf", "four.pdf"];
        let paths: Vec<_> = names.iter().map(|n| inbox_file(dir.path(), n, n.as_bytes())).collect();
        let (queue, worker) = spawn_worker(sorter(&base, Recording(Mutex::new(Vec::new()))));

        for path in &paths[..3] {
            queue.enqueue(path.clone()).unwrap();
        }
        let last = queue.submit(paths[3].clone()).await.unwrap();
        assert_eq!(last.action(), "filed");
        drop(queue);

        let sorter = worker.await.unwrap();
        let seen = sorter.classifier.0.lock().unwrap().clone();
        assert_eq!(seen, names);

        let tree = sorter.tree();
        let cn = tree.lookup("Sem - 3/CN").unwrap();
        assert_eq!(tree.get(cn).files().len(), 4);
    }

    #[tokio::test]
    async fn submitting_after_worker_stops_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, worker) = spawn_worker(sorter(dir.path(), ByName(Vec::new())));
        worker.abort();
        let _ = worker.await;

        let err = queue.submit(dir.path().join("x.pdf")).await.unwrap_err();
        assert!(matches!(err, ArborError::WorkerStopped));
    }
}
