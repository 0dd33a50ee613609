// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use arbor::classifier::HttpClassifier;
use arbor::config::AppConfig;
use arbor::history::{History, UndoOutcome};
use arbor::loader::DirectoryLoader;
use arbor::operations::FileOperationsManager;
use arbor::paths::PathResolver;
use arbor::pipeline::{spawn_worker, FileStatus, Sorter};
use arbor::tree::CategorySnapshot;

fn drop_in(inbox: &Path, name: &str) -> PathBuf {
    let path = inbox.join(name);
    fs::write(&path, name.as_bytes()).unwrap();
    path
}

async fn config_for(root: &Path) -> AppConfig {
    let mut config = AppConfig {
        base_dir: root.join("Subjects").to_string_lossy().into_owned(),
        data_dir: root.join(".arbor").to_string_lossy().into_owned(),
        watch_paths: vec![root.join("inbox").to_string_lossy().into_owned()],
        ..AppConfig::default()
    };
    config.classifier.url = common::spawn_classifier().await;
    config.classifier.timeout_secs = 5;
    config
}

#[tokio::test]
async fn sorts_inbox_through_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path()).await;
    let inbox = dir.path().join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    let base = config.base_path();

    let files = vec![
        drop_in(&inbox, "tcp.pdf"),
        drop_in(&inbox, "graphs.pdf"),
        drop_in(&inbox, "blank.png"),
        drop_in(&inbox, "scheduling.pdf"),
    ];

    let operations = FileOperationsManager::new(PathResolver::new(&base))
        .with_history(History::new(config.history_path()));
    let sorter = Sorter::new(
        config.initial_tree(),
        operations,
        HttpClassifier::new(&config.classifier).unwrap(),
    )
    .with_snapshot(config.snapshot_path());
    let (queue, worker) = spawn_worker(sorter);

    let mut reports = Vec::new();
    for file in &files {
        reports.push(queue.submit(file.clone()).await.unwrap());
    }
    drop(queue);
    let sorter = worker.await.unwrap();

    let actions: Vec<_> = reports.iter().map(|r| r.action()).collect();
    assert_eq!(actions, ["filed", "filed", "classification-failed", "filed"]);
    assert!(matches!(reports[2].status, FileStatus::ClassificationFailed(_)));

    // Disk
    assert!(base.join("Sem - 3/CN/tcp.pdf").exists());
    assert!(base.join("Sem - 3/DSA/graphs.pdf").exists());
    assert!(base.join("Sem - 4/OS/scheduling.pdf").exists());
    assert!(inbox.join("blank.png").exists());
    assert!(!inbox.join("tcp.pdf").exists());

    // Tree agrees with disk
    let tree = sorter.tree();
    tree.check_invariants().unwrap();
    let loader = DirectoryLoader::new(PathResolver::new(&base));
    for name in ["Sem - 3/CN", "Sem - 3/DSA", "Sem - 4/OS"] {
        let id = tree.lookup(name).unwrap();
        assert_eq!(tree.get(id).files(), loader.load(tree, id).await.unwrap().as_slice(), "{}", name);
    }

    // New categories survive a restart
    let snapshot = CategorySnapshot::load(&config.snapshot_path()).unwrap().unwrap();
    let mut restarted = config.initial_tree();
    assert!(restarted.lookup("Sem - 4/OS").is_none());
    restarted.restore(&snapshot);
    assert!(restarted.lookup("Sem - 4/OS").is_some());
}

#[tokio::test]
async fn filed_moves_can_be_undone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path()).await;
    let inbox = dir.path().join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    let original = drop_in(&inbox, "tcp.pdf");

    let history = History::new(config.history_path());
    let operations = FileOperationsManager::new(PathResolver::new(config.base_path()))
        .with_history(history.clone());
    let mut sorter = Sorter::new(
        config.initial_tree(),
        operations,
        HttpClassifier::new(&config.classifier).unwrap(),
    );

    let report = sorter.process(&original).await;
    assert_eq!(report.action(), "filed");
    assert!(!original.exists());

    let undone = history.undo(1, false).unwrap();
    assert_eq!(undone.len(), 1);
    assert_eq!(undone[0].1, UndoOutcome::Undone);
    assert_eq!(undone[0].0.category.as_deref(), Some("Sem - 3/CN"));
    assert!(original.exists());
}

#[tokio::test]
async fn name_collisions_get_a_timestamp_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path()).await;
    let inbox = dir.path().join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    let cn = config.base_path().join("Sem - 3/CN");
    fs::create_dir_all(&cn).unwrap();
    fs::write(cn.join("tcp.pdf"), b"older").unwrap();

    let operations = FileOperationsManager::new(PathResolver::new(config.base_path()));
    let mut sorter = Sorter::new(
        config.initial_tree(),
        operations,
        HttpClassifier::new(&config.classifier).unwrap(),
    );

    let report = sorter.process(&drop_in(&inbox, "tcp.pdf")).await;

    let destination = report.destination().unwrap();
    let name = destination.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("tcp_") && name.ends_with(".pdf"), "{}", name);
    assert_eq!(fs::read(cn.join("tcp.pdf")).unwrap(), b"older");
    assert_eq!(fs::read(destination).unwrap(), b"tcp.pdf");
}
