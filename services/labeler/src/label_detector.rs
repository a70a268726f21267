//! Label detection against AWS Rekognition.
//!
//! The service reports confidence as a binary float. It is converted to an
//! exact decimal here, at the boundary, using the shortest representation
//! that round-trips to the same float (`93.33333`, not `93.33332824707031`).

use crate::config::DetectionConfig;
use crate::model::{Label, UploadedObject};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_rekognition::error::DisplayErrorContext;
use aws_sdk_rekognition::operation::detect_labels::DetectLabelsOutput;
use aws_sdk_rekognition::primitives::Blob;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client as RekognitionClient;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Where the detection service reads the image from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Previously uploaded object
    Object(UploadedObject),
    /// Raw encoded image bytes
    Bytes(Vec<u8>),
}

impl ImageSource {
    fn describe(&self) -> String {
        match self {
            ImageSource::Object(object) => format!("s3://{}/{}", object.bucket, object.key),
            ImageSource::Bytes(bytes) => format!("{} inline bytes", bytes.len()),
        }
    }
}

/// Managed label-detection service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelService: Send + Sync {
    /// Detect labels, returned in service order. An empty list is a valid answer.
    async fn detect_labels(
        &self,
        source: ImageSource,
        max_labels: i32,
        min_confidence: f32,
    ) -> Result<Vec<Label>>;
}

/// Rekognition `DetectLabels` client
pub struct RekognitionLabelService {
    client: RekognitionClient,
}

impl RekognitionLabelService {
    pub fn new(client: RekognitionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LabelService for RekognitionLabelService {
    async fn detect_labels(
        &self,
        source: ImageSource,
        max_labels: i32,
        min_confidence: f32,
    ) -> Result<Vec<Label>> {
        let output = self
            .client
            .detect_labels()
            .image(image_for(source))
            .max_labels(max_labels)
            .min_confidence(min_confidence)
            .send()
            .await
            .map_err(|e| anyhow!("DetectLabels failed: {}", DisplayErrorContext(&e)))?;

        labels_from_output(&output)
    }
}

/// Request image: an S3 reference or inline bytes
fn image_for(source: ImageSource) -> Image {
    match source {
        ImageSource::Object(object) => Image::builder()
            .s3_object(
                S3Object::builder()
                    .bucket(object.bucket)
                    .name(object.key)
                    .build(),
            )
            .build(),
        ImageSource::Bytes(bytes) => Image::builder().bytes(Blob::new(bytes)).build(),
    }
}

/// Labels of a response in service order; one malformed entry fails the image
fn labels_from_output(output: &DetectLabelsOutput) -> Result<Vec<Label>> {
    output
        .labels()
        .iter()
        .map(|label| convert_label(label.name(), label.confidence()))
        .collect()
}

/// Turn a raw service label into a [`Label`], rejecting malformed entries
fn convert_label(name: Option<&str>, confidence: Option<f32>) -> Result<Label> {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .context("Malformed response: label without a name")?;

    let raw = confidence
        .with_context(|| format!("Malformed response: label '{name}' has no confidence"))?;

    let confidence = confidence_from_f32(raw).with_context(|| {
        format!("Malformed response: label '{name}' has invalid confidence {raw}")
    })?;

    Ok(Label::new(name, confidence))
}

/// Exact decimal for a service confidence, `None` unless finite and in [0, 100]
pub fn confidence_from_f32(value: f32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }

    // f32 Display yields the shortest digits that round-trip to `value`
    let decimal = Decimal::from_str(&value.to_string()).ok()?;

    if decimal < Decimal::ZERO || decimal > Decimal::ONE_HUNDRED {
        return None;
    }

    Some(decimal)
}

/// Applies the configured label limits to every detection call
pub struct LabelDetector {
    service: Arc<dyn LabelService>,
    max_labels: i32,
    min_confidence: f32,
}

impl LabelDetector {
    pub fn new(service: Arc<dyn LabelService>, config: &DetectionConfig) -> Self {
        Self {
            service,
            max_labels: config.max_labels,
            min_confidence: config.min_confidence,
        }
    }

    #[instrument(skip(self, source), fields(source = %source.describe()))]
    pub async fn detect(&self, source: ImageSource) -> Result<Vec<Label>> {
        let labels = self
            .service
            .detect_labels(source, self.max_labels, self.min_confidence)
            .await?;

        debug!(label_count = labels.len(), "Labels detected");

        Ok(labels)
    }
}
