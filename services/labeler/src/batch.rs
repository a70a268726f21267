use crate::asset::ImageAsset;
use crate::environment::Environment;
use crate::error::PipelineError;
use crate::pipeline::{ImageOutcome, Pipeline};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What happened to one file of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Record written with `label_count` labels (possibly zero)
    Stored { object_key: String, label_count: usize },
    /// Extension outside the allow-list
    SkippedUnsupported,
    /// No labels detected and empty results are not persisted
    SkippedEmpty,
    /// Processing failed at `stage`
    Failed { stage: String, reason: String },
}

impl From<ImageOutcome> for FileOutcome {
    fn from(outcome: ImageOutcome) -> Self {
        match outcome {
            ImageOutcome::Stored {
                object_key, labels, ..
            } => FileOutcome::Stored {
                object_key,
                label_count: labels.len(),
            },
            ImageOutcome::SkippedEmpty { .. } => FileOutcome::SkippedEmpty,
        }
    }
}

impl From<&PipelineError> for FileOutcome {
    fn from(e: &PipelineError) -> Self {
        match e {
            PipelineError::UnsupportedFile { .. } => FileOutcome::SkippedUnsupported,
            other => FileOutcome::Failed {
                stage: other.kind().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Per-file entry of a batch report
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| self.path.to_string_lossy());

        match &self.outcome {
            FileOutcome::Stored { label_count: 0, .. } => {
                write!(f, "stored   {name} (no labels)")
            }
            FileOutcome::Stored {
                label_count,
                object_key,
            } => write!(f, "stored   {name} ({label_count} labels, {object_key})"),
            FileOutcome::SkippedUnsupported => write!(f, "skipped  {name} (unsupported file type)"),
            FileOutcome::SkippedEmpty => write!(f, "skipped  {name} (no labels, not persisted)"),
            FileOutcome::Failed { reason, .. } => write!(f, "error    {name}: {reason}"),
        }
    }
}

/// Outcome of a whole batch run. A batch never fails as a unit.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub environment: Environment,
    pub files: Vec<FileReport>,
    /// Set when the run was cancelled before reaching every file
    pub cancelled: bool,
    /// Files left untouched because of cancellation
    pub unprocessed: usize,
}

impl BatchReport {
    pub fn stored_count(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Stored { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                FileOutcome::SkippedUnsupported | FileOutcome::SkippedEmpty
            )
        })
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    /// Files that errored, with their outcome
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| predicate(&f.outcome)).count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            writeln!(f, "{file}")?;
        }
        write!(
            f,
            "{} stored, {} skipped, {} failed ({})",
            self.stored_count(),
            self.skipped_count(),
            self.failed_count(),
            self.environment
        )?;
        if self.cancelled {
            write!(f, "; cancelled with {} files unprocessed", self.unprocessed)?;
        }
        Ok(())
    }
}

/// Runs the single-image pipeline over every image in a folder.
///
/// Files are processed one at a time in filename order. A failing file is
/// recorded and the run moves on; results already written are kept.
pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between files once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Process a folder.
    ///
    /// Only configuration and folder listing errors are returned; per-file
    /// errors end up in the report.
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        folder: &Path,
        environment: Environment,
    ) -> Result<BatchReport, PipelineError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let target = self.pipeline.resolve(environment)?;
        let entries = list_files(folder).await?;

        info!(
            folder = %folder.display(),
            table = %target.table,
            file_count = entries.len(),
            "Starting batch"
        );

        let mut report = BatchReport {
            run_id,
            environment,
            files: Vec::with_capacity(entries.len()),
            cancelled: false,
            unprocessed: 0,
        };

        let total = entries.len();
        for (index, entry) in entries.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.unprocessed = total - index;
                warn!(unprocessed = report.unprocessed, "Batch cancelled");
                break;
            }

            let FolderEntry { path, unreadable } = entry;
            let outcome = match (ImageAsset::from_path(&path), unreadable) {
                (Err(e), _) => {
                    debug!(path = %path.display(), "Skipping unsupported file");
                    metrics::counter!("labeler.images.skipped", "reason" => "unsupported")
                        .increment(1);
                    FileOutcome::from(&e)
                }
                (Ok(_), Some(source)) => {
                    let e = PipelineError::Io {
                        path: path.clone(),
                        source,
                    };
                    error!(path = %path.display(), error = %e, "Cannot read image");
                    metrics::counter!("labeler.images.failed", "stage" => e.kind()).increment(1);
                    FileOutcome::from(&e)
                }
                (Ok(asset), None) => match self.pipeline.process_asset(&asset, &target).await {
                    Ok(outcome) => FileOutcome::from(outcome),
                    Err(e) => {
                        error!(
                            path = %path.display(),
                            stage = e.kind(),
                            error = %e,
                            "Failed to process image"
                        );
                        FileOutcome::from(&e)
                    }
                },
            };

            report.files.push(FileReport { path, outcome });
        }

        info!(
            stored = report.stored_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            "Batch finished"
        );

        Ok(report)
    }
}

/// One entry of the folder being processed
struct FolderEntry {
    path: PathBuf,
    /// Set when the entry could not be inspected (broken link, vanished file)
    unreadable: Option<std::io::Error>,
}

/// Entries directly inside `folder`, sorted by name. Directories are left
/// out; entries that cannot be inspected are kept so they get reported.
async fn list_files(folder: &Path) -> Result<Vec<FolderEntry>, PipelineError> {
    let io_error = |source| PipelineError::Io {
        path: folder.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(folder).await.map_err(io_error)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        // Follows symlinks
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(FolderEntry {
                path,
                unreadable: None,
            }),
            Ok(_) => debug!(path = %path.display(), "Ignoring non-file entry"),
            Err(e) => files.push(FolderEntry {
                path,
                unreadable: Some(e),
            }),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
