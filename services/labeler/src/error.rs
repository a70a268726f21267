use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while processing images.
///
/// `Configuration` aborts a run, as does `Io` on the folder itself. Every
/// other variant, and `Io` on a single entry, fails only that image when
/// running a batch.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Upload failed for {filename}: {message}")]
    Upload { filename: String, message: String },

    #[error("Label detection failed for {filename}: {message}")]
    Detection { filename: String, message: String },

    #[error("Failed to persist result for {filename}: {message}")]
    Persistence { filename: String, message: String },

    #[error("Failed to scan table {table}: {message}")]
    Scan { table: String, message: String },

    #[error("Unsupported file type: {}", path.display())]
    UnsupportedFile { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Short stage name used in reports and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Upload { .. } => "upload",
            PipelineError::Detection { .. } => "detection",
            PipelineError::Persistence { .. } => "persistence",
            PipelineError::Scan { .. } => "scan",
            PipelineError::UnsupportedFile { .. } => "unsupported",
            PipelineError::Io { .. } => "io",
        }
    }
}
