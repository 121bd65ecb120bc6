//! Inventory graph engine for Nimbus.
//!
//! Parsers build inventory objects into named collections owned by a
//! [`Persister`]. Cross-collection references are created lazily, resolved in
//! one step after parsing, and the resulting graph is diffed against the
//! target store into an ordered, per-collection write plan.

pub mod object;
pub mod collection;
pub mod definition;
pub mod resolver;
pub mod tag_mapper;
pub mod persister;
pub mod memory_store;

pub use object::InventoryObject;
pub use collection::{CollectionScope, CollectionSpec, InventoryCollection, Strategy, Target};
pub use definition::ManagerDefinition;
pub use resolver::ResolutionStats;
pub use tag_mapper::{TAGS_COLLECTION, TagMapper};
pub use persister::{
    CollectionError, CollectionFailure, CollectionResult, CommitReport, Persister, RunStatus,
};
pub use memory_store::MemoryStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::object::InventoryObject;
    pub use crate::collection::{CollectionScope, CollectionSpec, InventoryCollection, Strategy};
    pub use crate::definition::ManagerDefinition;
    pub use crate::persister::{CommitReport, Persister, RunStatus};
    pub use crate::memory_store::MemoryStore;
    pub use nimbus_core::prelude::*;
}
