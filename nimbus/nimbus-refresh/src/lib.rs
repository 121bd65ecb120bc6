//! Nimbus Refresh - provider inventory refresh for cloud and storage managers.
//!
//! A refresh walks already collected provider records, maps them onto a
//! manager's inventory collections and commits the resulting graph:
//!
//! ```text
//! Collector -> Parser (mapping steps) -> Persister -> TargetStore
//! ```
//!
//! The [`Refresher`] drives one run per manager; [`definitions`] declares the
//! collections of each manager type and [`parser`] holds their mapping steps.

pub mod collector;
pub mod definitions;
pub mod logging;
pub mod parser;
pub mod refresher;

pub use collector::MemoryCollector;
pub use definitions::{CLOUD_MANAGER, STORAGE_MANAGER};
pub use logging::init_tracing;
pub use parser::{ParseContext, ParseReport, Parser, SkippedRecord};
pub use refresher::{RefreshOutcome, RefreshTarget, Refresher};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::collector::MemoryCollector;
    pub use crate::definitions::{self, CLOUD_MANAGER, STORAGE_MANAGER};
    pub use crate::parser::{ParseReport, Parser};
    pub use crate::refresher::{RefreshOutcome, RefreshTarget, Refresher};
    pub use nimbus_inventory::prelude::*;
}
