//! Single-image pipeline: upload, detect, persist.
//!
//! [`Pipeline`] is the composition root. It owns the client handles (passed
//! in, never global) and runs each network stage under its own timeout.

use crate::asset::ImageAsset;
use crate::config::{Config, DetectionSource, ResolvedTarget};
use crate::environment::Environment;
use crate::error::PipelineError;
use crate::label_detector::{ImageSource, LabelDetector, LabelService};
use crate::model::{AnalysisResult, Label};
use crate::result_store::{ResultWriter, TableStore};
use crate::s3_uploader::{ImageUploader, ObjectStore};
use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Client handles the pipeline talks to
#[derive(Clone)]
pub struct Clients {
    pub object_store: Arc<dyn ObjectStore>,
    pub label_service: Arc<dyn LabelService>,
    pub table_store: Arc<dyn TableStore>,
}

/// Result of running one image through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageOutcome {
    /// Record written; `labels` may be empty
    Stored {
        filename: String,
        object_key: String,
        labels: Vec<Label>,
    },
    /// No labels detected and empty results are not persisted
    SkippedEmpty { filename: String, object_key: String },
}

pub struct Pipeline {
    config: Config,
    uploader: ImageUploader,
    detector: LabelDetector,
    writer: ResultWriter,
}

impl Pipeline {
    pub fn new(config: Config, clients: Clients) -> Self {
        let uploader = ImageUploader::new(clients.object_store, config.storage.key_prefix.clone());
        let detector = LabelDetector::new(clients.label_service, &config.detection);
        let writer = ResultWriter::new(clients.table_store);

        Self {
            config,
            uploader,
            detector,
            writer,
        }
    }

    /// Pre-flight: bucket and table for an environment
    pub fn resolve(&self, environment: Environment) -> Result<ResolvedTarget, PipelineError> {
        Ok(self.config.resolve(environment)?)
    }

    /// Single-image entry point. Configuration is resolved before anything
    /// touches the network; every error is returned to the caller.
    pub async fn process_file(
        &self,
        path: &Path,
        environment: Environment,
    ) -> Result<ImageOutcome, PipelineError> {
        let target = self.resolve(environment)?;
        let asset = ImageAsset::from_path(path)?;
        self.process_asset(&asset, &target).await
    }

    /// Run upload, detection and persistence for one image
    #[instrument(
        skip(self, asset, target),
        fields(filename = %asset.filename(), environment = %target.environment)
    )]
    pub async fn process_asset(
        &self,
        asset: &ImageAsset,
        target: &ResolvedTarget,
    ) -> Result<ImageOutcome, PipelineError> {
        let started = Instant::now();
        let result = self.run_stages(asset, target).await;

        match &result {
            Ok(ImageOutcome::Stored { .. }) => {
                metrics::counter!("labeler.images.stored").increment(1);
            }
            Ok(ImageOutcome::SkippedEmpty { .. }) => {
                metrics::counter!("labeler.images.skipped", "reason" => "empty").increment(1);
            }
            Err(e) => {
                warn!(stage = e.kind(), error = %e, "Image processing failed");
                metrics::counter!("labeler.images.failed", "stage" => e.kind()).increment(1);
            }
        }
        metrics::histogram!("labeler.image.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn run_stages(
        &self,
        asset: &ImageAsset,
        target: &ResolvedTarget,
    ) -> Result<ImageOutcome, PipelineError> {
        let filename = asset.filename().to_string();
        let inline = self.config.detection.source == DetectionSource::InlineBytes;

        let (object, inline_bytes) = with_timeout(self.config.upload_timeout(), async {
            let body = asset
                .read()
                .await
                .with_context(|| format!("Failed to read {}", asset.path().display()))?;
            let inline_bytes = inline.then(|| body.clone());
            let object = self
                .uploader
                .upload(asset, body, &target.bucket, target.environment)
                .await?;
            Ok::<_, anyhow::Error>((object, inline_bytes))
        })
        .await
        .map_err(|e| PipelineError::Upload {
            filename: filename.clone(),
            message: format!("{e:#}"),
        })?;

        let source = match inline_bytes {
            Some(bytes) => ImageSource::Bytes(bytes),
            None => ImageSource::Object(object.clone()),
        };

        let labels = with_timeout(self.config.detect_timeout(), self.detector.detect(source))
            .await
            .map_err(|e| PipelineError::Detection {
                filename: filename.clone(),
                message: format!("{e:#}"),
            })?;

        info!(label_count = labels.len(), "Image analyzed");
        metrics::counter!("labeler.labels.detected").increment(labels.len() as u64);

        if labels.is_empty() && !self.config.detection.persist_empty {
            info!("No labels detected, result not persisted");
            return Ok(ImageOutcome::SkippedEmpty {
                filename,
                object_key: object.key,
            });
        }

        let timestamp = Utc::now().timestamp();
        let record = with_timeout(
            self.config.write_timeout(),
            self.writer.write(
                &target.table,
                &filename,
                labels,
                timestamp,
                target.environment,
            ),
        )
        .await
        .map_err(|e| PipelineError::Persistence {
            filename: filename.clone(),
            message: format!("{e:#}"),
        })?;

        Ok(ImageOutcome::Stored {
            filename,
            object_key: object.key,
            labels: record.labels,
        })
    }

    /// Every record stored for an environment, sorted by filename
    pub async fn list(&self, environment: Environment) -> Result<Vec<AnalysisResult>, PipelineError> {
        let table = self.config.table_for(environment)?;

        let scanned = self.writer.list(&table).await;
        scanned.map_err(|e| PipelineError::Scan {
            table,
            message: format!("{e:#}"),
        })
    }
}

async fn with_timeout<T, F>(limit: Duration, future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("timed out after {}s", limit.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label_detector::MockLabelService;
    use crate::result_store::MockTableStore;
    use crate::s3_uploader::MockObjectStore;
    use crate::testing::{InMemoryTableStore, RecordingObjectStore, ScriptedLabelService};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.storage.bucket = Some("images".to_string());
        config.tables.beta = Some("labels-beta".to_string());
        config.tables.production = Some("labels-prod".to_string());
        config
    }

    fn write_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        // Content is the filename so inline-bytes requests can be told apart
        std::fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    struct Harness {
        pipeline: Pipeline,
        objects: Arc<RecordingObjectStore>,
        tables: Arc<InMemoryTableStore>,
    }

    fn harness(config: Config, service: Arc<dyn LabelService>) -> Harness {
        let objects = Arc::new(RecordingObjectStore::new());
        let tables = Arc::new(InMemoryTableStore::new());
        let pipeline = Pipeline::new(
            config,
            Clients {
                object_store: objects.clone(),
                label_service: service,
                table_store: tables.clone(),
            },
        );
        Harness {
            pipeline,
            objects,
            tables,
        }
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_before_upload() {
        let mut objects = MockObjectStore::new();
        objects.expect_put_object().times(0);
        let mut service = MockLabelService::new();
        service.expect_detect_labels().times(0);
        let mut tables = MockTableStore::new();
        tables.expect_put_record().times(0);

        let mut config = test_config();
        config.storage.bucket = None;

        let pipeline = Pipeline::new(
            config,
            Clients {
                object_store: Arc::new(objects),
                label_service: Arc::new(service),
                table_store: Arc::new(tables),
            },
        );

        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cat.jpg");

        let err = pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_stores_labels_under_prefixed_key() {
        let service = ScriptedLabelService::new(vec![
            Label::new("Cat", dec("93.33333")),
            Label::new("Pet", dec("81.2")),
        ]);
        let h = harness(test_config(), Arc::new(service));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cat.jpg");

        let outcome = h
            .pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap();

        match outcome {
            ImageOutcome::Stored {
                filename,
                object_key,
                labels,
            } => {
                assert_eq!(filename, "cat.jpg");
                assert_eq!(object_key, "rekognition-input/cat.jpg");
                assert_eq!(labels.len(), 2);
            }
            other => panic!("Expected Stored, got {other:?}"),
        }

        assert_eq!(
            h.objects.puts(),
            vec![(
                "images".to_string(),
                "rekognition-input/cat.jpg".to_string(),
                7
            )]
        );

        let records = h.tables.records("labels-beta");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].labels[0].confidence.to_string(), "93.33333");
        assert_eq!(records[0].environment, Some(Environment::Beta));
        assert!(records[0].timestamp > 0);
    }

    #[tokio::test]
    async fn test_environment_routing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "dog.png");

        let h = harness(test_config(), Arc::new(ScriptedLabelService::default()));
        h.pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap();
        assert_eq!(h.tables.table_names(), vec!["labels-beta"]);

        let h = harness(test_config(), Arc::new(ScriptedLabelService::default()));
        h.pipeline
            .process_file(&path, Environment::Production)
            .await
            .unwrap();
        assert_eq!(h.tables.table_names(), vec!["labels-prod"]);
    }

    #[tokio::test]
    async fn test_reprocessing_replaces_record() {
        let service = ScriptedLabelService::new(vec![Label::new("Cat", dec("90"))]);
        let h = harness(test_config(), Arc::new(service));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cat.jpg");

        h.pipeline.process_file(&path, Environment::Beta).await.unwrap();
        h.pipeline.process_file(&path, Environment::Beta).await.unwrap();

        assert_eq!(h.tables.records("labels-beta").len(), 1);
        assert_eq!(h.objects.puts().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_labels_are_persisted_by_default() {
        let h = harness(test_config(), Arc::new(ScriptedLabelService::default()));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "blank.png");

        let outcome = h
            .pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ImageOutcome::Stored { ref labels, .. } if labels.is_empty()
        ));
        let records = h.tables.records("labels-beta");
        assert_eq!(records.len(), 1);
        assert!(records[0].labels.is_empty());
    }

    #[tokio::test]
    async fn test_empty_labels_skipped_when_configured() {
        let mut config = test_config();
        config.detection.persist_empty = false;
        let h = harness(config, Arc::new(ScriptedLabelService::default()));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "blank.png");

        let outcome = h
            .pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap();

        assert!(matches!(outcome, ImageOutcome::SkippedEmpty { .. }));
        assert!(h.tables.records("labels-beta").is_empty());
    }

    #[tokio::test]
    async fn test_inline_bytes_source() {
        let mut config = test_config();
        config.detection.source = DetectionSource::InlineBytes;
        let service = Arc::new(ScriptedLabelService::new(vec![Label::new("Tree", dec("75"))]));
        let h = harness(config, service.clone());
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "tree.jpeg");

        h.pipeline.process_file(&path, Environment::Production).await.unwrap();

        assert_eq!(service.calls(), vec![ImageSource::Bytes(b"tree.jpeg".to_vec())]);
        // The image is still uploaded
        assert_eq!(h.objects.puts().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_failure_writes_nothing() {
        let service = ScriptedLabelService::default().fail_on("cat.jpg", "ThrottlingException");
        let h = harness(test_config(), Arc::new(service));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cat.jpg");

        let err = h
            .pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap_err();

        match err {
            PipelineError::Detection { filename, message } => {
                assert_eq!(filename, "cat.jpg");
                assert!(message.contains("ThrottlingException"));
            }
            other => panic!("Expected Detection error, got {other:?}"),
        }
        assert!(h.tables.records("labels-beta").is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_an_upload_error() {
        let h = harness(test_config(), Arc::new(ScriptedLabelService::default()));
        let dir = tempfile::tempdir().unwrap();

        let err = h
            .pipeline
            .process_file(&dir.path().join("missing.jpg"), Environment::Beta)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Upload { .. }));
        assert!(h.objects.puts().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_file_is_rejected() {
        let h = harness(test_config(), Arc::new(ScriptedLabelService::default()));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "notes.txt");

        let err = h
            .pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::UnsupportedFile { .. }));
        assert!(h.objects.puts().is_empty());
    }

    struct SlowLabelService;

    #[async_trait]
    impl LabelService for SlowLabelService {
        async fn detect_labels(
            &self,
            _source: ImageSource,
            _max_labels: i32,
            _min_confidence: f32,
        ) -> anyhow::Result<Vec<Label>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_detection_timeout() {
        let mut config = test_config();
        config.timeouts.detect_secs = 1;
        let h = harness(config, Arc::new(SlowLabelService));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cat.jpg");

        let err = h
            .pipeline
            .process_file(&path, Environment::Beta)
            .await
            .unwrap_err();

        match err {
            PipelineError::Detection { message, .. } => assert!(message.contains("timed out")),
            other => panic!("Expected Detection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_reads_selected_table() {
        let h = harness(test_config(), Arc::new(ScriptedLabelService::default()));
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "cat.jpg");
        h.pipeline.process_file(&path, Environment::Beta).await.unwrap();

        assert_eq!(h.pipeline.list(Environment::Beta).await.unwrap().len(), 1);
        assert!(h.pipeline.list(Environment::Production).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_scan_failure() {
        let mut tables = MockTableStore::new();
        tables
            .expect_scan()
            .returning(|_| Err(anyhow!("ResourceNotFoundException")));

        let pipeline = Pipeline::new(
            test_config(),
            Clients {
                object_store: Arc::new(RecordingObjectStore::new()),
                label_service: Arc::new(ScriptedLabelService::default()),
                table_store: Arc::new(tables),
            },
        );

        let err = pipeline.list(Environment::Production).await.unwrap_err();
        assert!(matches!(err, PipelineError::Scan { ref table, .. } if table == "labels-prod"));
    }
}
