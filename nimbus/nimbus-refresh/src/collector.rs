//! In-memory collector fed from JSON documents.
//!
//! A document maps inventory categories to arrays of raw records:
//!
//! ```json
//! { "tenants": [{"id": "t1", "name": "alpha"}], "vms": [] }
//! ```

use nimbus_core::error::{NimbusError, Result};
use nimbus_core::record::RawRecord;
use nimbus_core::traits::Collector;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Collector holding already fetched records per category
#[derive(Debug, Clone, Default)]
pub struct MemoryCollector {
    categories: HashMap<String, Vec<RawRecord>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records to a category
    pub fn with_records(mut self, category: &str, records: Vec<RawRecord>) -> Self {
        self.categories
            .entry(category.to_string())
            .or_default()
            .extend(records);
        self
    }

    /// Build a collector from a JSON document
    pub fn from_json(document: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(categories) = document else {
            return Err(NimbusError::internal(
                "collector document must be a JSON object of categories",
            ));
        };

        let mut collector = Self::new();
        for (category, records) in categories {
            let serde_json::Value::Array(records) = records else {
                return Err(NimbusError::internal(format!(
                    "category '{}' must be an array of records",
                    category
                )));
            };
            let records = records
                .into_iter()
                .map(RawRecord::from_json)
                .collect::<Result<Vec<_>>>()?;
            debug!("Collected {} {} records", records.len(), category);
            collector = collector.with_records(&category, records);
        }
        Ok(collector)
    }

    /// Load a collector document from a file
    pub async fn load(path: &Path) -> Result<Self> {
        info!("Loading collector document from: {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let document: serde_json::Value = serde_json::from_str(&content)?;
        Self::from_json(document)
    }

    /// Names of the categories holding records
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }
}

impl Collector for MemoryCollector {
    fn records(&self, category: &str) -> &[RawRecord] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
