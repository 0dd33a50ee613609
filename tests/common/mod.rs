// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-process stand-in for the classification service

use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

/// Answer an upload based on the uploaded file's name
fn respond(file_name: &str, content: &[u8]) -> (StatusCode, Json<Value>) {
    let body = match file_name {
        "tcp.pdf" => json!({"main_category": "Sem - 3", "subcategory": "CN"}),
        "graphs.pdf" => json!({"main_category": "Sem - 3", "subcategory": ["DSA", "CN"]}),
        "scheduling.pdf" => json!({"main_category": "Sem - 4", "subcategory": "OS"}),
        "loose.pdf" => json!({}),
        "echo.txt" => json!({
            "main_category": "Echo",
            "subcategory": String::from_utf8_lossy(content),
        }),
        "blank.png" => json!({"error": "No text could be found in the image."}),
        "crash.pdf" => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "model crashed"})));
        }
        _ => return (StatusCode::BAD_REQUEST, Json(json!({"error": "Unsupported file"}))),
    };
    (StatusCode::OK, Json(body))
}

async fn upload(mut multipart: Multipart) -> (StatusCode, Json<Value>) {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await.unwrap_or_default();
        return respond(&name, &content);
    }
    (StatusCode::BAD_REQUEST, Json(json!({"error": "No file part"})))
}

/// Start the mock service and return its upload URL
pub async fn spawn_classifier() -> String {
    let app = Router::new().route("/upload", post(upload));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/upload", addr)
}
