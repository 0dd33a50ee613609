// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

mod common;

use arbor::classifier::{ClassificationClient, HttpClassifier};
use arbor::config::ClassifierConfig;
use arbor::merger::Subcategory;
use tokio_test::{assert_err, assert_ok};

async fn client() -> HttpClassifier {
    let config = ClassifierConfig {
        url: common::spawn_classifier().await,
        timeout_secs: 5,
        ..ClassifierConfig::default()
    };
    HttpClassifier::new(&config).unwrap()
}

#[tokio::test]
async fn classifies_single_subcategory() {
    let client = client().await;

    let result = assert_ok!(client.classify("tcp.pdf", b"tcp".to_vec()).await);

    assert_eq!(result.main_category.as_deref(), Some("Sem - 3"));
    assert_eq!(result.subcategory, Some(Subcategory::One("CN".to_string())));
}

#[tokio::test]
async fn uploads_file_content_as_multipart() {
    let client = client().await;

    let result = assert_ok!(client.classify("echo.txt", b"Payload".to_vec()).await);

    assert_eq!(result.sub_label(), "Payload");
}

#[tokio::test]
async fn array_subcategory_keeps_first_label() {
    let client = client().await;

    let result = assert_ok!(client.classify("graphs.pdf", b"g".to_vec()).await);

    assert_eq!(result.sub_label(), "DSA");
}

#[tokio::test]
async fn missing_labels_fall_back_to_defaults() {
    let client = client().await;

    let result = assert_ok!(client.classify("loose.pdf", b"l".to_vec()).await);

    assert_eq!(result.main_label(), "unknown");
    assert_eq!(result.sub_label(), "Unknown");
}

#[tokio::test]
async fn error_body_is_a_classification_failure() {
    let client = client().await;

    let err = assert_err!(client.classify("blank.png", b"png".to_vec()).await);

    assert!(err.is_classification());
    assert!(err.to_string().contains("No text could be found"));
}

#[tokio::test]
async fn server_error_is_a_classification_failure() {
    let client = client().await;

    let err = assert_err!(client.classify("crash.pdf", b"c".to_vec()).await);

    assert!(err.is_classification());
    assert!(err.to_string().contains("500"));
    assert!(err.to_string().contains("model crashed"));
}

#[tokio::test]
async fn unreachable_service_fails_health_check() {
    let config = ClassifierConfig {
        url: "http://127.0.0.1:9/upload".to_string(),
        timeout_secs: 2,
        ..ClassifierConfig::default()
    };
    let client = HttpClassifier::new(&config).unwrap();

    assert_err!(client.health_check().await);
    assert_ok!(self::client().await.health_check().await);
}
