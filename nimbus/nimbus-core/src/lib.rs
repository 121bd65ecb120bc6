//! Core types and abstractions for the Nimbus inventory refresh engine.
//!
//! This crate provides the identity keys, attribute values, references,
//! write-plan types, configuration and error handling shared by the graph
//! engine and the provider parsers, plus the `Collector` and `TargetStore`
//! boundaries.

pub mod error;
pub mod types;
pub mod record;
pub mod plan;
pub mod traits;
pub mod config;

pub use error::{NimbusError, Result};
pub use types::*;
pub use record::RawRecord;
pub use plan::{BatchPhase, CollectionBatch, Operation, PlannedWrite, WritePlan};
pub use traits::{Collector, TargetStore};
pub use config::{RefreshConfig, RefreshMode, TagMappingRule};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{NimbusError, Result};
    pub use crate::types::*;
    pub use crate::record::RawRecord;
    pub use crate::plan::{BatchPhase, CollectionBatch, Operation, PlannedWrite, WritePlan};
    pub use crate::traits::{Collector, TargetStore};
    pub use crate::config::{RefreshConfig, RefreshMode, TagMappingRule};
}
