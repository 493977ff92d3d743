//! The rule execution engine.
//!
//! One [`Engine`] wraps one compiled catalog and drives a single scan
//! unit: discovery builds the inventory, the check runner classifies every
//! rule/resource pairing as PASS, FAIL, or ERROR. Orchestration across
//! units lives in [`crate::scan`].

pub mod catalog;
pub mod condition;
pub mod config;
pub mod discovery;
pub mod inventory;
pub mod outcome;
pub mod runner;
pub mod template;
pub mod value;

use std::path::Path;
use std::time::Instant;

use tracing::{info, instrument, Span};

use catalog::{Catalog, CatalogError};
use config::ScanConfig;
use discovery::DiscoveryExecutor;
use inventory::Inventory;
use outcome::CheckResult;
use crate::provider::CloudClient;

pub struct Engine {
    catalog: Catalog,
    config: ScanConfig,
}

impl Engine {
    pub fn new(catalog: Catalog, config: ScanConfig) -> Self {
        Self { catalog, config }
    }

    /// Load and compile a rule document. Validation failures surface here,
    /// before any client is built or call issued.
    pub async fn load(path: impl AsRef<Path>, config: ScanConfig) -> Result<Self, CatalogError> {
        let catalog = Catalog::load(path).await?;
        Ok(Self::new(catalog, config))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run discovery and checks for one `(service, region)` unit.
    #[instrument(
        name = "scan_unit",
        skip_all,
        fields(
            provider = %self.catalog.provider,
            service = %self.catalog.service,
            region = region.unwrap_or("global"),
            resources = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        )
    )]
    pub async fn run(&self, client: &dyn CloudClient, region: Option<&str>) -> Vec<CheckResult> {
        let start = Instant::now();
        let mut inventory = Inventory::new();
        let executor = DiscoveryExecutor::new(
            client,
            self.catalog.provider,
            &self.catalog.service,
            region,
            self.config.max_pages,
        );
        executor.execute(&self.catalog.steps, &mut inventory).await;

        let results = runner::run_checks(&self.catalog, &inventory, &self.config);

        let span = Span::current();
        span.record("resources", inventory.total_items());
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        info!(
            pass = results.iter().filter(|r| r.status.is_pass()).count(),
            fail = results.iter().filter(|r| r.status.is_fail()).count(),
            error = results.iter().filter(|r| r.status.is_error()).count(),
            "scan unit complete"
        );
        results
    }

    /// One ERROR row per (filtered) check, used when the unit cannot run
    /// at all - deadline expiry, missing client, crashed task.
    pub fn synthetic_errors(&self, reason: &str) -> Vec<CheckResult> {
        self.catalog
            .checks
            .iter()
            .filter(|check| self.config.wants_check(&check.rule_id))
            .map(|check| CheckResult::synthetic_error(&check.rule_id, check.severity, reason))
            .collect()
    }
}
