//! Scan reports.
//!
//! A scan produces one [`ScanReport`]: per-unit result lists plus a
//! rolled-up [`Summary`]. Units are sorted and maps are ordered, so the
//! serialized bundle is byte-identical across runs over the same input.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::outcome::{CheckResult, CheckStatus, Severity};
use crate::provider::ProviderKind;

/// Results for one `(provider, service, region)` scan unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub provider: ProviderKind,
    pub service: String,
    /// Absent for global services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// A unit-level failure that prevented or cut short the scan. The
    /// per-check rows still carry their own error reasons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<CheckResult>,
}

impl UnitReport {
    pub fn ok(
        provider: ProviderKind,
        service: &str,
        region: Option<&str>,
        results: Vec<CheckResult>,
    ) -> Self {
        Self {
            provider,
            service: service.to_string(),
            region: region.map(str::to_string),
            error: None,
            results,
        }
    }

    pub fn failed(
        provider: ProviderKind,
        service: &str,
        region: Option<&str>,
        error: impl Into<String>,
        results: Vec<CheckResult>,
    ) -> Self {
        Self {
            provider,
            service: service.to_string(),
            region: region.map(str::to_string),
            error: Some(error.into()),
            results,
        }
    }

    /// `service` or `service/region`, as shown in logs and tables.
    pub fn label(&self) -> String {
        match &self.region {
            Some(region) => format!("{}/{}", self.service, region),
            None => self.service.clone(),
        }
    }
}

/// Outcome counts across every unit in the scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    /// FAIL counts keyed by severity, most severe first.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures_by_severity: BTreeMap<Severity, usize>,
}

impl Summary {
    fn tally(units: &[UnitReport]) -> Self {
        let mut summary = Summary::default();
        for result in units.iter().flat_map(|unit| unit.results.iter()) {
            match result.status {
                CheckStatus::Pass => summary.passed += 1,
                CheckStatus::Fail => {
                    summary.failed += 1;
                    *summary
                        .failures_by_severity
                        .entry(result.severity)
                        .or_default() += 1;
                }
                CheckStatus::Error => summary.errored += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitReport>,
    pub summary: Summary,
}

impl ScanReport {
    /// Assembles the final report: units sorted by provider, service, and
    /// region, summary tallied from every row.
    pub fn build(
        scan_id: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        mut units: Vec<UnitReport>,
    ) -> Self {
        units.sort_by(|a, b| {
            (a.provider, &a.service, &a.region).cmp(&(b.provider, &b.service, &b.region))
        });
        let summary = Summary::tally(&units);
        Self {
            scan_id,
            started_at,
            finished_at,
            units,
            summary,
        }
    }

    /// Serializes the report as pretty-printed JSON at `path`, creating
    /// parent directories as needed.
    pub async fn write_bundle(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("failed to serialize scan report")?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create report directory {}", parent.display())
                })?;
            }
        }
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "wrote scan report");
        Ok(())
    }
}
