//! Refresh driver: one run of one manager, from collector records to a
//! committed write plan.

use crate::definitions;
use crate::parser::{self, ParseReport};
use futures::future::join_all;
use nimbus_core::config::{RefreshConfig, RefreshMode};
use nimbus_core::error::{NimbusError, Result};
use nimbus_core::traits::{Collector, TargetStore};
use nimbus_core::types::ManagerScope;
use nimbus_inventory::{CommitReport, Persister, RunStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Which manager to refresh, and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    pub manager_type: String,
    pub scope: ManagerScope,
    /// Overrides the configured refresh mode
    pub mode: Option<RefreshMode>,
}

impl RefreshTarget {
    pub fn new(manager_type: impl Into<String>, scope: ManagerScope) -> Self {
        Self {
            manager_type: manager_type.into(),
            scope,
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: RefreshMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Outcome of one refresh run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub manager: String,
    pub scope: ManagerScope,
    pub run_id: Uuid,
    pub parse: ParseReport,
    pub commit: CommitReport,
}

impl RefreshOutcome {
    pub fn status(&self) -> RunStatus {
        self.commit.status
    }
}

/// Runs refreshes against a shared target store
pub struct Refresher {
    store: Arc<dyn TargetStore>,
    config: RefreshConfig,
}

impl Refresher {
    pub fn new(store: Arc<dyn TargetStore>, config: RefreshConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    /// Refresh one manager.
    ///
    /// Unknown manager types and invalid definitions fail before the collector
    /// is read. Record-level problems land in the parse report; collection
    /// failures in the commit report.
    #[instrument(skip(self, collector), fields(manager = %target.manager_type, scope = %target.scope))]
    pub async fn refresh(&self, target: &RefreshTarget, collector: &dyn Collector) -> Result<RefreshOutcome> {
        let mut definition = definitions::by_name(&target.manager_type)
            .ok_or_else(|| NimbusError::config(format!("unknown manager type '{}'", target.manager_type)))?;
        let parser = parser::for_manager(&target.manager_type)
            .ok_or_else(|| NimbusError::config(format!("no parser for manager type '{}'", target.manager_type)))?;

        let mode = target.mode.unwrap_or(self.config.inventory.refresh_mode);
        if mode == RefreshMode::Targeted {
            definition = definition.targeted();
        }

        let mut persister = Persister::new(&definition, target.scope.clone(), &self.config)?;
        info!("Starting {:?} refresh of {} ({})", mode, definition.name, persister.run_id());

        persister.preload(self.store.as_ref()).await?;
        let parse = parser.parse(collector, &mut persister)?;
        let commit = persister.commit(self.store.as_ref()).await?;

        info!(
            "Finished refresh of {}: {:?}, {} writes, {} skipped records",
            definition.name,
            commit.status,
            commit.writes_applied(),
            parse.skipped.len()
        );

        Ok(RefreshOutcome {
            manager: definition.name.clone(),
            scope: target.scope.clone(),
            run_id: persister.run_id(),
            parse,
            commit,
        })
    }

    /// Refresh several managers concurrently, e.g. a cloud manager and its
    /// storage sub-manager. Results keep the order of `targets`.
    pub async fn refresh_all(&self, targets: &[(RefreshTarget, &dyn Collector)]) -> Vec<Result<RefreshOutcome>> {
        join_all(
            targets
                .iter()
                .map(|(target, collector)| self.refresh(target, *collector)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MemoryCollector;
    use crate::definitions::{CLOUD_MANAGER, names};
    use nimbus_core::record::RawRecord;
    use nimbus_core::traits::Collector;
    use nimbus_inventory::MemoryStore;
    use serde_json::json;

    fn tenants() -> MemoryCollector {
        MemoryCollector::new().with_records(
            "tenants",
            vec![RawRecord::from_json(json!({"id": "t1", "name": "alpha"})).unwrap()],
        )
    }

    #[tokio::test]
    async fn test_unknown_manager_type() {
        let refresher = Refresher::new(Arc::new(MemoryStore::new()), RefreshConfig::default());
        let target = RefreshTarget::new("network_manager", ManagerScope::new("ems-1"));

        let err = refresher.refresh(&target, &tenants()).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_targeted_mode_never_deletes() {
        let store = Arc::new(MemoryStore::new());
        let scope = ManagerScope::new("ems-1");
        let refresher = Refresher::new(store.clone(), RefreshConfig::default());

        let full = RefreshTarget::new(CLOUD_MANAGER, scope.clone());
        refresher.refresh(&full, &tenants()).await.unwrap();
        assert_eq!(store.len(names::CLOUD_TENANTS, &scope), 1);

        let targeted = RefreshTarget::new(CLOUD_MANAGER, scope.clone()).with_mode(RefreshMode::Targeted);
        let outcome = refresher.refresh(&targeted, &MemoryCollector::new()).await.unwrap();
        assert_eq!(outcome.manager, "cloud_manager_targeted");
        assert_eq!(outcome.commit.plan.deletes(), 0);
        assert_eq!(store.len(names::CLOUD_TENANTS, &scope), 1);
    }

    #[tokio::test]
    async fn test_empty_collector_is_success() {
        let refresher = Refresher::new(Arc::new(MemoryStore::new()), RefreshConfig::default());
        let empty = MemoryCollector::new();
        assert!(empty.records("vms").is_empty());

        let outcome = refresher
            .refresh(&RefreshTarget::new(CLOUD_MANAGER, ManagerScope::new("ems-1")), &empty)
            .await
            .unwrap();
        assert_eq!(outcome.status(), RunStatus::Success);
        assert!(outcome.commit.plan.is_empty());
        assert_eq!(outcome.parse.steps.len(), 13);
    }
}
