use crate::environment::Environment;
use crate::model::{AnalysisResult, Label};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// Attribute names of the result table
const ATTR_FILENAME: &str = "filename";
const ATTR_LABELS: &str = "labels";
const ATTR_TIMESTAMP: &str = "timestamp";
const ATTR_ENVIRONMENT: &str = "branch";
const ATTR_LABEL_NAME: &str = "Name";
const ATTR_LABEL_CONFIDENCE: &str = "Confidence";

pub type Item = HashMap<String, AttributeValue>;

/// Table store holding one record per filename
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Upsert a record keyed by its filename
    async fn put_record(&self, table: &str, record: &AnalysisResult) -> Result<()>;

    /// Return every record in the table
    async fn scan(&self, table: &str) -> Result<Vec<AnalysisResult>>;
}

/// DynamoDB-backed table store
pub struct DynamoTableStore {
    client: DynamoClient,
}

impl DynamoTableStore {
    pub fn new(client: DynamoClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableStore for DynamoTableStore {
    async fn put_record(&self, table: &str, record: &AnalysisResult) -> Result<()> {
        // A single PutItem replaces any previous record for the key
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(to_item(record)))
            .send()
            .await
            .map_err(|e| anyhow!("PutItem failed: {}", DisplayErrorContext(&e)))?;

        Ok(())
    }

    async fn scan(&self, table: &str) -> Result<Vec<AnalysisResult>> {
        scan_pages(table, |start_key| async move {
            let output = self
                .client
                .scan()
                .table_name(table)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| anyhow!("Scan failed: {}", DisplayErrorContext(&e)))?;

            Ok(ScanPage {
                items: output.items().to_vec(),
                last_evaluated_key: output.last_evaluated_key().cloned(),
            })
        })
        .await
    }
}

/// One page of a table scan
struct ScanPage {
    items: Vec<Item>,
    last_evaluated_key: Option<Item>,
}

/// Fetch pages until no continuation key is returned.
///
/// Rows that cannot be parsed are logged and skipped; the remaining records
/// are still returned.
async fn scan_pages<F, Fut>(table: &str, mut fetch: F) -> Result<Vec<AnalysisResult>>
where
    F: FnMut(Option<Item>) -> Fut,
    Fut: Future<Output = Result<ScanPage>>,
{
    let mut records = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let page = fetch(start_key.take()).await?;

        for item in &page.items {
            match from_item(item) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(table = %table, error = %format!("{e:#}"), "Skipping malformed record")
                }
            }
        }

        match page.last_evaluated_key {
            Some(key) if !key.is_empty() => start_key = Some(key),
            _ => break,
        }
    }

    Ok(records)
}

/// Convert a record into a DynamoDB item.
///
/// Confidence is written as a number string taken from the decimal, so the
/// stored digits are exactly the decimal's digits.
pub fn to_item(record: &AnalysisResult) -> Item {
    let labels = record
        .labels
        .iter()
        .map(|label| {
            AttributeValue::M(HashMap::from([
                (
                    ATTR_LABEL_NAME.to_string(),
                    AttributeValue::S(label.name.clone()),
                ),
                (
                    ATTR_LABEL_CONFIDENCE.to_string(),
                    AttributeValue::N(label.confidence.to_string()),
                ),
            ]))
        })
        .collect();

    let mut item = HashMap::from([
        (
            ATTR_FILENAME.to_string(),
            AttributeValue::S(record.filename.clone()),
        ),
        (ATTR_LABELS.to_string(), AttributeValue::L(labels)),
        (
            ATTR_TIMESTAMP.to_string(),
            AttributeValue::N(record.timestamp.to_string()),
        ),
    ]);

    if let Some(environment) = record.environment {
        item.insert(
            ATTR_ENVIRONMENT.to_string(),
            AttributeValue::S(environment.to_string()),
        );
    }

    item
}

/// Parse a DynamoDB item back into a record
pub fn from_item(item: &Item) -> Result<AnalysisResult> {
    let filename = item
        .get(ATTR_FILENAME)
        .and_then(|v| v.as_s().ok())
        .context("Record has no filename")?
        .clone();

    let timestamp = match item.get(ATTR_TIMESTAMP) {
        Some(value) => {
            let raw = value
                .as_n()
                .map_err(|_| anyhow!("Record {filename}: timestamp is not a number"))?;
            raw.parse::<i64>()
                .with_context(|| format!("Record {filename}: invalid timestamp '{raw}'"))?
        }
        None => bail!("Record {filename} has no timestamp"),
    };

    let labels = match item.get(ATTR_LABELS) {
        Some(value) => value
            .as_l()
            .map_err(|_| anyhow!("Record {filename}: labels is not a list"))?
            .iter()
            .map(|entry| label_from_attribute(entry).with_context(|| format!("Record {filename}")))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let environment = item
        .get(ATTR_ENVIRONMENT)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| s.parse::<Environment>().ok());

    Ok(AnalysisResult {
        filename,
        labels,
        timestamp,
        environment,
    })
}

fn label_from_attribute(value: &AttributeValue) -> Result<Label> {
    let map = value
        .as_m()
        .map_err(|_| anyhow!("label entry is not a map"))?;

    let name = map
        .get(ATTR_LABEL_NAME)
        .and_then(|v| v.as_s().ok())
        .context("label has no name")?;

    let raw = map
        .get(ATTR_LABEL_CONFIDENCE)
        .and_then(|v| v.as_n().ok())
        .with_context(|| format!("label '{name}' has no confidence"))?;

    let confidence = Decimal::from_str(raw)
        .with_context(|| format!("label '{name}' has invalid confidence '{raw}'"))?;

    Ok(Label::new(name.clone(), confidence))
}

/// Writes analysis results to the resolved table
pub struct ResultWriter {
    store: Arc<dyn TableStore>,
}

impl ResultWriter {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Write one record for `filename`, replacing any previous one
    #[instrument(skip(self, labels), fields(label_count = labels.len()))]
    pub async fn write(
        &self,
        table: &str,
        filename: &str,
        labels: Vec<Label>,
        timestamp: i64,
        environment: Environment,
    ) -> Result<AnalysisResult> {
        let record = AnalysisResult {
            filename: filename.to_string(),
            labels,
            timestamp,
            environment: Some(environment),
        };

        self.store.put_record(table, &record).await?;

        info!(table = %table, filename = %filename, "Result stored");

        Ok(record)
    }

    /// All records in a table, sorted by filename
    #[instrument(skip(self))]
    pub async fn list(&self, table: &str) -> Result<Vec<AnalysisResult>> {
        let mut records = self.store.scan(table).await?;
        records.sort_by(|a, b| a.filename.cmp(&b.filename));

        debug!(table = %table, count = records.len(), "Scanned result table");

        Ok(records)
    }
}
