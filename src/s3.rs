//! S3 implementation of [`ObjectStore`] for project backup archives.
//!
//! Credentials come from the default AWS provider chain; only the bucket and region are
//! configured here.

use std::env;

use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use clickhelper_core::contract::{BackupObject, ObjectStore};
use clickhelper_core::error::RemoteError;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
}

impl S3Config {
    /// Reads `AWS_S3_BUCKET_NAME` (required). The region is `region` when configured, otherwise
    /// `AWS_REGION`, otherwise [`DEFAULT_REGION`].
    pub fn from_env(region: Option<&str>) -> anyhow::Result<Self> {
        let bucket = env::var("AWS_S3_BUCKET_NAME").map_err(|e| {
            error!(error = ?e, "AWS_S3_BUCKET_NAME missing in environment");
            anyhow!("AWS_S3_BUCKET_NAME must be set for backups")
        })?;
        let region = region
            .map(str::to_string)
            .or_else(|| env::var("AWS_REGION").ok())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Ok(Self { bucket, region })
    }
}

#[derive(Debug, Clone)]
pub struct S3BackupStore {
    client: Client,
    bucket: String,
}

impl S3BackupStore {
    pub async fn new(config: S3Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        info!(bucket = %config.bucket, region = %config.region, "Initialized S3 backup store");
        Self {
            client: Client::new(&sdk_config),
            bucket: config.bucket,
        }
    }
}

fn map_sdk_error<E>(err: &SdkError<E>, what: &str) -> RemoteError
where
    E: std::error::Error + 'static,
{
    error!(operation = what, error = %err, "S3 request failed");
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            RemoteError::Transport(format!("{what}: {err}"))
        }
        SdkError::ServiceError(service) => RemoteError::Status {
            status: service.raw().status().as_u16(),
            body: format!("{what}: {}", service.err()),
        },
        _ => RemoteError::Protocol(format!("{what}: {err}")),
    }
}

#[async_trait]
impl ObjectStore for S3BackupStore {
    async fn list_backup_objects(&self, prefix: &str) -> Result<Vec<BackupObject>, RemoteError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|ref err| map_sdk_error(err, "ListObjectsV2"))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                // Objects without a timestamp sort as the oldest.
                let last_modified = object
                    .last_modified()
                    .and_then(|lm| DateTime::from_timestamp(lm.secs(), lm.subsec_nanos()))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                objects.push(BackupObject {
                    key: key.to_string(),
                    last_modified,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(prefix, found = objects.len(), "Listed backups in S3");
        Ok(objects)
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|ref err| map_sdk_error(err, "PutObject"))?;
        info!(bucket = %self.bucket, key, size, "Uploaded object to S3");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), RemoteError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|ref err| map_sdk_error(err, "DeleteObject"))?;
        Ok(())
    }
}
