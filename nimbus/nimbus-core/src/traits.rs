//! Boundaries of the refresh engine: where raw data comes from and where the
//! write plan goes.

use crate::error::Result;
use crate::plan::CollectionBatch;
use crate::record::RawRecord;
use crate::types::{ManagerScope, StoredRecord};
use async_trait::async_trait;

/// Source of already fetched, paginated and deserialized provider records.
pub trait Collector: Send + Sync {
    /// All records of an inventory category; unknown categories are empty
    fn records(&self, category: &str) -> &[RawRecord];

    /// Find a record of a category by its `id` field
    fn find_by_id(&self, category: &str, id: &str) -> Option<&RawRecord> {
        self.records(category)
            .iter()
            .find(|r| r.text("id").as_deref() == Some(id))
    }
}

/// Durable store the write plan is applied to.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Current rows of a collection under a manager scope
    async fn current_membership(
        &self,
        collection: &str,
        scope: &ManagerScope,
    ) -> Result<Vec<StoredRecord>>;

    /// Apply one collection batch atomically, returning the number of rows written.
    ///
    /// Creates must behave as upserts keyed by the identity key so concurrent
    /// runs converging on the same key never duplicate rows.
    async fn apply_batch(&self, batch: &CollectionBatch) -> Result<usize>;
}
