use crate::asset::ImageAsset;
use crate::config::AwsConfig;
use crate::environment::Environment;
use crate::model::UploadedObject;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Blob storage the images are pushed to before detection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create or replace an object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Build the S3 client from shared AWS settings
    pub fn from_sdk_config(sdk_config: &SdkConfig, config: &AwsConfig) -> Self {
        let mut s3_config_builder = S3ConfigBuilder::from(sdk_config);

        // Force path-style access for LocalStack/MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(region = %config.region, "S3 object store initialized");

        Self::new(client)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| anyhow!("PutObject failed: {}", DisplayErrorContext(&e)))?;

        Ok(())
    }
}

/// Uploads local images under a deterministic key.
///
/// Key format: `{prefix}/{filename}`, or the bare filename when the prefix is
/// empty. Two local files with the same basename map to the same key and the
/// later upload replaces the earlier one.
pub struct ImageUploader {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
}

impl ImageUploader {
    pub fn new(store: Arc<dyn ObjectStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Object key for a filename
    pub fn object_key(&self, filename: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{prefix}/{filename}")
        }
    }

    /// Upload image bytes and return the object they now live at
    #[instrument(skip(self, asset, body), fields(filename = %asset.filename()))]
    pub async fn upload(
        &self,
        asset: &ImageAsset,
        body: Vec<u8>,
        bucket: &str,
        environment: Environment,
    ) -> Result<UploadedObject> {
        let key = self.object_key(asset.filename());
        let size_bytes = body.len();

        debug!(bucket = %bucket, key = %key, size_bytes, "Uploading image");

        let metadata = HashMap::from([
            ("source-filename".to_string(), asset.filename().to_string()),
            ("environment".to_string(), environment.to_string()),
        ]);

        self.store
            .put_object(
                bucket,
                &key,
                body,
                asset.media_type().content_type(),
                metadata,
            )
            .await?;

        info!(bucket = %bucket, key = %key, size_bytes, "Image uploaded");

        Ok(UploadedObject {
            bucket: bucket.to_string(),
            key,
        })
    }
}
