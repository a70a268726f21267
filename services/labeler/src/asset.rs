use crate::error::PipelineError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Image media type inferred from the file extension. This is the
/// allow-list: `.jpg`, `.jpeg` and `.png`, compared case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Jpeg,
    Png,
}

impl MediaType {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
        }
    }
}

/// A local image file. Read once per pipeline run, never modified.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    path: PathBuf,
    filename: String,
    media_type: MediaType,
}

impl ImageAsset {
    /// Build an asset from a path, rejecting anything outside the allow-list
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();

        let media_type = match MediaType::from_path(&path) {
            Some(media_type) => media_type,
            None => return Err(PipelineError::UnsupportedFile { path }),
        };

        let filename = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return Err(PipelineError::UnsupportedFile { path }),
        };

        Ok(Self {
            path,
            filename,
            media_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Basename of the file; the record key in the result table
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}
