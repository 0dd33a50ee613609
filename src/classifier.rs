// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Client for the content-classification service

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::merger::ClassificationResult;
use crate::{ArborError, Result};

/// Upper bound on the wait between two upload attempts
const MAX_BACKOFF_SECS: u64 = 60;

/// Something that can label a file from its raw bytes
#[async_trait]
pub trait ClassificationClient: Send + Sync {
    async fn classify(&self, file_name: &str, content: Vec<u8>) -> Result<ClassificationResult>;
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    result: ClassificationResult,
}

/// Classification service reached over HTTP with a multipart upload
pub struct HttpClassifier {
    client: Client,
    url: String,
    field_name: String,
    retries: u32,
}

impl HttpClassifier {
    /// Create a new client
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim().to_string(),
            field_name: config.field_name.clone(),
            retries: config.retries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check that the service answers at all. Any HTTP response counts,
    /// since upload endpoints commonly reject GET.
    pub async fn health_check(&self) -> Result<()> {
        self.client
            .get(&self.url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ArborError::Classification(format!("Cannot connect to classifier at {}: {}", self.url, e))
            })?;

        Ok(())
    }

    async fn upload(&self, file_name: &str, content: Vec<u8>) -> Result<ClassificationResult> {
        let part = Part::bytes(content).file_name(file_name.to_string());
        let form = Form::new().part(self.field_name.clone(), part);

        debug!("Uploading {} to {}", file_name, self.url);

        let response = self.client
            .post(&self.url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<UploadResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(ArborError::Classification(format!(
                "Classifier returned status {}: {}",
                status,
                detail.trim()
            )));
        }

        let parsed: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| ArborError::Classification(format!("Malformed classifier response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(ArborError::Classification(error));
        }

        Ok(parsed.result)
    }
}

#[async_trait]
impl ClassificationClient for HttpClassifier {
    /// Upload with the configured number of retries (0 by default)
    async fn classify(&self, file_name: &str, content: Vec<u8>) -> Result<ClassificationResult> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!("Retrying classification of {} in {:?} (attempt {})", file_name, delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.upload(file_name, content.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ArborError::Classification("Unknown error".to_string())
        }))
    }
}

/// Exponential delay before retry `attempt` (1-based), capped
fn backoff(attempt: u32) -> Duration {
    let secs = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}
