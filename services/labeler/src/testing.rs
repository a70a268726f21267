//! In-memory collaborators for unit tests.

use crate::label_detector::{ImageSource, LabelService};
use crate::model::{AnalysisResult, Label};
use crate::result_store::{from_item, to_item, Item, TableStore};
use crate::s3_uploader::ObjectStore;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Table store keeping items in their DynamoDB shape, so reads go through
/// the same conversion as production code.
#[derive(Default)]
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Item>>>,
    failing_filenames: HashSet<String>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(filenames: &[&str]) -> Self {
        Self {
            failing_filenames: filenames.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn records(&self, table: &str) -> Vec<AnalysisResult> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|items| items.values().map(|item| from_item(item).unwrap()).collect())
            .unwrap_or_default()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn put_record(&self, table: &str, record: &AnalysisResult) -> Result<()> {
        if self.failing_filenames.contains(&record.filename) {
            bail!("simulated write failure for {}", record.filename);
        }

        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(record.filename.clone(), to_item(record));
        Ok(())
    }

    async fn scan(&self, table: &str) -> Result<Vec<AnalysisResult>> {
        let tables = self.tables.lock().unwrap();
        match tables.get(table) {
            Some(items) => items.values().map(from_item).collect(),
            None => Ok(Vec::new()),
        }
    }
}

/// Object store recording every put as `(bucket, key, size)`
#[derive(Default)]
pub struct RecordingObjectStore {
    puts: Mutex<Vec<(String, String, usize)>>,
}

impl RecordingObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> Vec<(String, String, usize)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.puts
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string(), body.len()));
        Ok(())
    }
}

/// Label service answering from a per-file script.
///
/// Files are matched on the trailing component of the object key, or on
/// the content for inline bytes (the tests write the filename as content).
#[derive(Default)]
pub struct ScriptedLabelService {
    answers: HashMap<String, std::result::Result<Vec<Label>, String>>,
    default_labels: Vec<Label>,
    calls: Mutex<Vec<ImageSource>>,
}

impl ScriptedLabelService {
    pub fn new(default_labels: Vec<Label>) -> Self {
        Self {
            default_labels,
            ..Self::default()
        }
    }

    pub fn fail_on(mut self, filename: &str, message: &str) -> Self {
        self.answers
            .insert(filename.to_string(), Err(message.to_string()));
        self
    }

    pub fn answer(mut self, filename: &str, labels: Vec<Label>) -> Self {
        self.answers.insert(filename.to_string(), Ok(labels));
        self
    }

    pub fn calls(&self) -> Vec<ImageSource> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelService for ScriptedLabelService {
    async fn detect_labels(
        &self,
        source: ImageSource,
        _max_labels: i32,
        _min_confidence: f32,
    ) -> Result<Vec<Label>> {
        let filename = match &source {
            ImageSource::Object(object) => object
                .key
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            ImageSource::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };
        self.calls.lock().unwrap().push(source);

        match self.answers.get(&filename) {
            Some(Ok(labels)) => Ok(labels.clone()),
            Some(Err(message)) => bail!("{message}"),
            None => Ok(self.default_labels.clone()),
        }
    }
}
