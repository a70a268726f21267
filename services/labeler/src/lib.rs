//! Image Labeler
//!
//! Uploads local images to object storage, asks a label detection service
//! what they contain, and records the labels in a result table selected by
//! deployment environment.
//!
//! A single image is processed with [`Pipeline::process_file`]; a folder with
//! [`BatchRunner::run`], where a failing image is reported and skipped while
//! the rest of the folder carries on.
//!
//! ## Architecture
//!
//! ```text
//! Local files            S3 Bucket                  DynamoDB
//! ┌──────────────┐      ┌──────────────────┐       ┌──────────────┐
//! │ *.jpg *.jpeg │      │ rekognition-     │       │ beta table   │
//! │ *.png        │      │   input/{file}   │       │ prod table   │
//! └──────────────┘      └──────────────────┘       └──────────────┘
//!        │                   ▲        │                   ▲
//!        ▼                   │        ▼                   │
//! ┌──────────────┐      ┌─────────┐ ┌──────────────┐ ┌──────────────┐
//! │ Batch        │─────▶│ Image   │ │ Label        │ │ Result       │
//! │ Runner       │      │ Uploader│ │ Detector     │ │ Writer       │
//! └──────────────┘      └─────────┘ └──────────────┘ └──────────────┘
//!                                    (Rekognition)
//! ```

pub mod asset;
pub mod aws;
pub mod batch;
pub mod config;
pub mod environment;
pub mod error;
pub mod label_detector;
pub mod model;
pub mod pipeline;
pub mod result_store;
pub mod s3_uploader;

#[cfg(test)]
mod testing;

pub use crate::asset::ImageAsset;
pub use crate::aws::AwsClients;
pub use crate::batch::{BatchReport, BatchRunner, FileOutcome, FileReport};
pub use crate::config::{Config, ConfigError, ResolvedTarget};
pub use crate::environment::Environment;
pub use crate::error::PipelineError;
pub use crate::model::{AnalysisResult, Label};
pub use crate::pipeline::{Clients, ImageOutcome, Pipeline};
