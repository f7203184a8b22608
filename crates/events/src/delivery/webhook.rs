//! Callback delivery with bounded retry.
//!
//! [`CallbackNotifier`] POSTs a finished task's id and status to the task's
//! `external_callback` URL, either with the result images attached as
//! multipart `files` parts or, when the task carries an enabled upload
//! config, as a JSON body listing the uploaded image URLs.
//!
//! Only connection-level failures are retried: up to three attempts, one
//! second apart. An HTTP error status is logged and the delivery dropped.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::delivery::storage::{ObjectStore, S3ObjectStore, UploadConfig};
use crate::hooks::{FinishedTask, TaskObserver};

/// Total attempts per delivery, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Pause between attempts after a connection failure.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for callback delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Callback returned HTTP {0}")]
    HttpStatus(u16),

    /// Uploading an artifact to object storage failed.
    #[error("Artifact upload failed: {0}")]
    Storage(String),

    /// A result artifact could not be read from disk.
    #[error("Cannot read artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Request(e) if e.is_connect())
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Body of one callback, built once and re-sent on retry.
enum Payload {
    Files(Vec<Attachment>),
    Urls(Vec<String>),
}

struct Attachment {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl Attachment {
    async fn read(path: &str) -> Result<Self, DeliveryError> {
        let path = Path::new(path);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_ascii_lowercase();
        Ok(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("image.{ext}")),
            content_type: format!("image/{ext}"),
            bytes: tokio::fs::read(path).await?,
        })
    }
}

// ---------------------------------------------------------------------------
// CallbackNotifier
// ---------------------------------------------------------------------------

/// Notifies task submitters that their task finished.
#[derive(Clone)]
pub struct CallbackNotifier {
    client: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    retry_delay: Duration,
}

impl CallbackNotifier {
    /// A notifier uploading through [`S3ObjectStore`].
    pub fn new() -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            store: Arc::new(S3ObjectStore),
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Deliver the notification for `task` with retry.
    ///
    /// Does nothing when the task has no callback URL.
    pub async fn deliver(&self, task: &FinishedTask) -> Result<(), DeliveryError> {
        let Some(url) = task.external_callback.as_deref() else {
            return Ok(());
        };
        let payload = self.build_payload(task).await?;

        let mut attempt = 1;
        loop {
            match self.try_send(url, task, &payload).await {
                Ok(()) => {
                    tracing::info!(task_id = %task.task_id, url, "Callback delivered");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        task_id = %task.task_id,
                        attempt,
                        url,
                        error = %e,
                        "Callback delivery attempt failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        task_id = %task.task_id,
                        attempt,
                        url,
                        error = %e,
                        "Callback delivery abandoned"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Upload or read the task's images.
    ///
    /// A failed upload leaves that image out of the URL list.
    async fn build_payload(&self, task: &FinishedTask) -> Result<Payload, DeliveryError> {
        match UploadConfig::from_task_value(task.upload_config.as_ref()) {
            Some(config) => {
                let now = Utc::now();
                let mut urls = Vec::with_capacity(task.images.len());
                for (index, path) in task.images.iter().enumerate() {
                    let bytes = tokio::fs::read(path).await?;
                    let key = config.object_key(&task.task_id, index, now);
                    match self.store.upload(&config, &key, bytes).await {
                        Ok(url) => urls.push(url),
                        Err(e) => {
                            tracing::error!(task_id = %task.task_id, key, error = %e, "Artifact upload failed");
                        }
                    }
                }
                Ok(Payload::Urls(urls))
            }
            None => {
                let mut files = Vec::with_capacity(task.images.len());
                for path in &task.images {
                    files.push(Attachment::read(path).await?);
                }
                Ok(Payload::Files(files))
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(
        &self,
        url: &str,
        task: &FinishedTask,
        payload: &Payload,
    ) -> Result<(), DeliveryError> {
        let request = match payload {
            Payload::Urls(urls) => self.client.post(url).json(&serde_json::json!({
                "task_id": task.task_id,
                "status": task.status,
                "images": urls,
            })),
            Payload::Files(files) => {
                let mut form = reqwest::multipart::Form::new()
                    .text("task_id", task.task_id.clone())
                    .text("status", task.status.as_str());
                for file in files {
                    let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                        .file_name(file.file_name.clone())
                        .mime_str(&file.content_type)?;
                    form = form.part("files", part);
                }
                self.client.post(url).multipart(form)
            }
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskObserver for CallbackNotifier {
    /// Delivery runs on its own task so retries never hold up the queue.
    async fn on_finished(&self, task: &FinishedTask) {
        if task.external_callback.is_none() {
            return;
        }
        let notifier = self.clone();
        let task = task.clone();
        tokio::spawn(async move {
            // Failures are logged inside `deliver`.
            let _ = notifier.deliver(&task).await;
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_is_not_retryable() {
        let err = DeliveryError::HttpStatus(502);
        assert_eq!(err.to_string(), "Callback returned HTTP 502");
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_error_is_not_retryable() {
        assert!(!DeliveryError::Storage("denied".into()).is_retryable());
    }

    #[test]
    fn new_builds_client() {
        assert!(CallbackNotifier::new().is_ok());
    }
}
