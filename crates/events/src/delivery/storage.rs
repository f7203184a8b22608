//! Object storage for result artifacts.
//!
//! A task submitted with an upload config has its images pushed to an
//! S3-compatible bucket before the callback fires; the callback then carries
//! the resulting URLs instead of file attachments.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::webhook::DeliveryError;

/// Destination for uploaded artifacts, supplied per task by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    pub endpoint_url: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub region_name: String,
    pub bucket_name: String,
    /// Key prefix inside the bucket.
    pub folder: String,
    /// Public base URL the returned links are built from.
    pub bucket_url: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint_url: String::new(),
            aws_access_key_id: String::new(),
            aws_secret_access_key: String::new(),
            region_name: String::new(),
            bucket_name: String::new(),
            folder: String::new(),
            bucket_url: String::new(),
        }
    }
}

impl UploadConfig {
    /// Parse the stored task column. `None` when absent, malformed or
    /// disabled.
    pub fn from_task_value(value: Option<&serde_json::Value>) -> Option<Self> {
        let config: Self = serde_json::from_value(value?.clone()).ok()?;
        config.enabled.then_some(config)
    }

    /// `{folder}/{YYYY-MM-DD}/{task_id}_{unix_secs}_{index}.png`
    pub fn object_key(&self, task_id: &str, index: usize, at: DateTime<Utc>) -> String {
        let name = format!(
            "{}/{task_id}_{}_{index}.png",
            at.format("%Y-%m-%d"),
            at.timestamp()
        );
        let folder = self.folder.trim_matches('/');
        if folder.is_empty() {
            name
        } else {
            format!("{folder}/{name}")
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.bucket_url.trim_end_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Uploads one artifact and returns its public URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        config: &UploadConfig,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<String, DeliveryError>;
}

/// [`ObjectStore`] over the AWS S3 API, using the static credentials and
/// endpoint carried in each [`UploadConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct S3ObjectStore;

impl S3ObjectStore {
    fn client(config: &UploadConfig) -> aws_sdk_s3::Client {
        let credentials = Credentials::new(
            config.aws_access_key_id.clone(),
            config.aws_secret_access_key.clone(),
            None,
            None,
            "renderq-upload-config",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region_name.clone()))
            .force_path_style(true);
        if !config.endpoint_url.is_empty() {
            builder = builder.endpoint_url(config.endpoint_url.clone());
        }
        aws_sdk_s3::Client::from_conf(builder.build())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        config: &UploadConfig,
        key: &str,
        bytes: Vec<u8>,
    ) -> Result<String, DeliveryError> {
        Self::client(config)
            .put_object()
            .bucket(&config.bucket_name)
            .key(key)
            .content_type("image/png")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| DeliveryError::Storage(format!("{e:?}")))?;

        Ok(config.object_url(key))
    }
}
