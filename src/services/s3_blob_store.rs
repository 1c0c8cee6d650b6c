//! S3-compatible bucket backend (AWS S3, Cloudflare R2, MinIO).
//!
//! `DeleteObject` succeeds whether or not the key existed, which is exactly
//! the delete-if-exists contract the reaper relies on. Some compatible
//! stores answer `NoSuchKey` instead; that is mapped to `NotFound`.

use crate::{
    errors::{BlobError, BlobResult},
    services::blob_store::{BlobStore, DeleteOutcome},
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client as S3Client,
    config::{BehaviorVersion, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata},
};
use tracing::debug;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    /// Custom endpoint, e.g. `https://<account>.r2.cloudflarestorage.com`.
    /// `None` uses the AWS endpoint for `region`.
    pub endpoint: Option<String>,
    pub region: String,
}

/// S3 storage backend.
///
/// Credentials come from the standard AWS provider chain
/// (`AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, profile, instance role).
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the environment plus `settings`.
    ///
    /// Path-style addressing is forced because R2 and MinIO expect
    /// `endpoint/bucket/key`.
    pub async fn connect(settings: &S3Settings) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self::new(
            S3Client::from_conf(builder.build()),
            settings.bucket.clone(),
        )
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn delete(&self, key: &str) -> BlobResult<DeleteOutcome> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey(key.to_string()));
        }

        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {
                debug!("deleted s3://{}/{}", self.bucket, key);
                Ok(DeleteOutcome::Deleted)
            }
            Err(err) if err.as_service_error().and_then(|e| e.code()) == Some("NoSuchKey") => {
                debug!("s3://{}/{} already missing", self.bucket, key);
                Ok(DeleteOutcome::NotFound)
            }
            Err(err) => Err(BlobError::Remote {
                key: key.to_string(),
                message: DisplayErrorContext(err).to_string(),
            }),
        }
    }
}
