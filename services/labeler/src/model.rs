use crate::environment::Environment;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A detected concept with its confidence in [0, 100].
///
/// Confidence is an exact decimal so it survives persistence unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub confidence: Decimal,
}

impl Label {
    pub fn new(name: impl Into<String>, confidence: Decimal) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// Remote counterpart of an uploaded image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
}

/// The persisted record, keyed by filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Image basename; partition key of the result table
    pub filename: String,
    /// Labels in the order the detection service returned them
    pub labels: Vec<Label>,
    /// Epoch seconds when the record was written
    pub timestamp: i64,
    /// Environment tag, absent on records written without one
    pub environment: Option<Environment>,
}
