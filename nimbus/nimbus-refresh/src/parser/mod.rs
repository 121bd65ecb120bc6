//! Parsers: map collector records onto a Persister's collections.
//!
//! A parser is an ordered list of named mapping steps. Each step walks one or
//! more record categories and calls `find_or_build` / `lazy_find` on the
//! Persister. Steps never touch the network or the target store.

pub mod cloud_manager;
pub mod storage_manager;

use nimbus_core::error::Result;
use nimbus_core::record::RawRecord;
use nimbus_core::traits::Collector;
use nimbus_core::types::{IntoKey, Value};
use nimbus_inventory::Persister;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Vendor recorded on compute resources
pub const VENDOR: &str = "telefonica";

const GIGABYTE: i64 = 1024 * 1024 * 1024;
const MEGABYTE: i64 = 1024 * 1024;

pub fn gigabytes(n: i64) -> i64 {
    n.saturating_mul(GIGABYTE)
}

pub fn megabytes(n: i64) -> i64 {
    n.saturating_mul(MEGABYTE)
}

/// A mapping step
pub type MappingStep = fn(&mut ParseContext<'_>) -> Result<()>;

// ============================================================================
// Parse Report
// ============================================================================

/// A record left out of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub step: String,
    pub category: String,
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseReport {
    /// Steps executed, in order
    pub steps: Vec<String>,
    pub records_seen: usize,
    pub skipped: Vec<SkippedRecord>,
}

// ============================================================================
// Parse Context
// ============================================================================

/// What a mapping step works with
pub struct ParseContext<'a> {
    pub collector: &'a dyn Collector,
    pub persister: &'a mut Persister,
    report: &'a mut ParseReport,
    step: &'static str,
}

impl<'a> ParseContext<'a> {
    /// Run `f` for each record of a category.
    ///
    /// A record-scoped error skips the record: whatever `f` built for it is
    /// dropped and the skip is reported. Anything else aborts the parse.
    pub fn each_record<F>(&mut self, category: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&mut ParseContext<'a>, &'a RawRecord) -> Result<()>,
    {
        let collector = self.collector;
        for record in collector.records(category) {
            self.report.records_seen += 1;
            self.persister.begin_record();
            let result = f(self, record);
            match result {
                Ok(()) => self.persister.finish_record(),
                Err(e) if e.is_record_scoped() => {
                    self.persister.rollback_record();
                    self.skip(category, record, e.to_string());
                }
                Err(e) => {
                    self.persister.finish_record();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Record a skipped record
    pub fn skip(&mut self, category: &str, record: &RawRecord, reason: String) {
        let id = record.text("id").or_else(|| record.text("name"));
        warn!(
            "Skipping {} record {} in step {}: {}",
            category,
            id.as_deref().unwrap_or("<no id>"),
            self.step,
            reason
        );
        self.report.skipped.push(SkippedRecord {
            step: self.step.to_string(),
            category: category.to_string(),
            id,
            reason,
        });
    }

    /// Lazy reference to `collection`, or null when the id is absent
    pub fn lazy_or_null(&self, collection: &str, id: Option<String>) -> Result<Value> {
        match id {
            Some(id) => Ok(Value::Lazy(self.persister.lazy_find(collection, id)?)),
            None => Ok(Value::Null),
        }
    }

    /// Lazy reference to `collection` for a required id
    pub fn lazy(&self, collection: &str, id: impl IntoKey) -> Result<Value> {
        Ok(Value::Lazy(self.persister.lazy_find(collection, id)?))
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Ordered mapping steps for one manager type
#[derive(Clone)]
pub struct Parser {
    name: String,
    steps: Vec<(&'static str, MappingStep)>,
}

impl Parser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a named step
    pub fn step(mut self, name: &'static str, step: MappingStep) -> Self {
        self.steps.push((name, step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in execution order
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(name, _)| *name).collect()
    }

    /// Run every step once, in order
    pub fn parse(&self, collector: &dyn Collector, persister: &mut Persister) -> Result<ParseReport> {
        let mut report = ParseReport::default();

        for (name, step) in &self.steps {
            debug!("Running mapping step {} of {}", name, self.name);
            let mut ctx = ParseContext {
                collector,
                persister: &mut *persister,
                report: &mut report,
                step: *name,
            };
            step(&mut ctx)?;
            report.steps.push(name.to_string());
        }

        debug!(
            "Parsed {} records for {} ({} skipped)",
            report.records_seen,
            self.name,
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Parser for a manager type name
pub fn for_manager(name: &str) -> Option<Parser> {
    match name {
        crate::definitions::CLOUD_MANAGER => Some(cloud_manager::parser()),
        crate::definitions::STORAGE_MANAGER => Some(storage_manager::parser()),
        _ => None,
    }
}

/// Last path segment of a device path, e.g. `/dev/vdb` -> `vdb`
pub fn device_basename(device: &str) -> &str {
    device.rsplit('/').next().unwrap_or(device)
}

/// Short host name, e.g. `compute-1.example.org` -> `compute-1`
pub fn short_host(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}
