//! Scan orchestration.
//!
//! Expands discovered rule documents into `(service, region)` scan units,
//! runs the units on a bounded worker pool, and aggregates their reports.
//! Units are isolated: a unit that fails validation, times out, or panics
//! becomes an ERROR entry in the report, never a scan abort.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::engine::catalog::Catalog;
use crate::engine::config::ScanConfig;
use crate::engine::Engine;
use crate::provider::{ClientRegistry, ProviderKind};
use crate::report::{ScanReport, UnitReport};

/// A rule document found under the rules root.
#[derive(Debug, Clone)]
pub struct RuleSource {
    pub provider: ProviderKind,
    pub service: String,
    pub path: PathBuf,
}

/// One independently scanned `(service, region)` pairing.
#[derive(Debug, Clone)]
pub struct ScanUnit {
    pub provider: ProviderKind,
    pub service: String,
    /// `None` for global services.
    pub region: Option<String>,
    pub rules_path: PathBuf,
}

impl ScanUnit {
    pub fn label(&self) -> String {
        match &self.region {
            Some(region) => format!("{}/{}", self.service, region),
            None => self.service.clone(),
        }
    }
}

/// Every `.yaml`/`.yml` file directly inside a `rules` directory under
/// `root`, sorted by path. This is the raw file listing; it makes no
/// judgement about document contents.
pub fn list_rule_documents(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("rules directory does not exist: {}", root.display());
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(OsStr::to_str),
            Some("yaml") | Some("yml")
        );
        if !path.is_file() || !is_yaml {
            continue;
        }
        if path.parent().and_then(Path::file_name) != Some(OsStr::new("rules")) {
            continue;
        }
        documents.push(path.to_path_buf());
    }

    documents.sort();
    Ok(documents)
}

/// Finds rule documents under `root`, following the
/// `services/<service>/rules/<service>.yaml` convention. Provider and
/// service come from the document header, not the path. Files whose
/// header cannot be parsed are skipped with a warning (`stratus validate`
/// reports them properly).
pub fn discover_rule_files(root: &Path) -> Result<Vec<RuleSource>> {
    let mut sources = Vec::new();
    for path in list_rule_documents(root)? {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read rule document {}", path.display()))?;
        match Catalog::peek(&content) {
            Ok((provider, service)) => {
                debug!(path = %path.display(), %provider, %service, "found rule document");
                sources.push(RuleSource {
                    provider,
                    service,
                    path,
                });
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "skipping rule document with unreadable header: {e}"
                );
            }
        }
    }

    sources.sort_by(|a, b| (a.provider, &a.service).cmp(&(b.provider, &b.service)));
    Ok(sources)
}

/// Expands rule sources into scan units: global services get exactly one
/// unit, regional services one per requested region (or the provider's
/// default region when none were requested). The service filter applies
/// here, before any unit spawns.
pub fn plan_units(sources: &[RuleSource], config: &ScanConfig) -> Vec<ScanUnit> {
    let mut units = Vec::new();
    for source in sources {
        if !config.wants_service(&source.service) {
            continue;
        }
        let unit = |region: Option<String>| ScanUnit {
            provider: source.provider,
            service: source.service.clone(),
            region,
            rules_path: source.path.clone(),
        };
        if source.provider.is_global_service(&source.service) {
            units.push(unit(None));
        } else if config.regions.is_empty() {
            units.push(unit(Some(source.provider.default_region().to_string())));
        } else {
            for region in &config.regions {
                units.push(unit(Some(region.clone())));
            }
        }
    }
    units
}

/// Runs scan units against clients from the registry and aggregates the
/// final report.
pub struct Scanner {
    registry: ClientRegistry,
    config: Arc<ScanConfig>,
}

impl Scanner {
    pub fn new(registry: ClientRegistry, config: ScanConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    /// Runs every unit on a semaphore-bounded pool and fans results into
    /// one report. Unit reports arrive over a channel; a task that panics
    /// never sends, so its slot is filled with a crashed entry that still
    /// carries one ERROR row per check.
    #[instrument(
        name = "scan",
        skip_all,
        fields(scan_id = tracing::field::Empty, units = units.len())
    )]
    pub async fn scan(&self, units: Vec<ScanUnit>) -> ScanReport {
        let scan_id = Uuid::now_v7().to_string();
        tracing::Span::current().record("scan_id", scan_id.as_str());
        let started_at = Utc::now();
        let deadline = self.config.deadline.map(|budget| Instant::now() + budget);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(units.len());
        for unit in units {
            let registry = self.registry.clone();
            let config = Arc::clone(&self.config);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let identity = unit.clone();
            let handle = tokio::spawn(async move {
                // The semaphore is never closed while units run.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let report = run_unit(&registry, &config, &unit, deadline).await;
                let _ = tx.send(report);
            });
            handles.push((identity, handle));
        }
        drop(tx);

        let mut reports = Vec::with_capacity(handles.len());
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }

        for (unit, handle) in handles {
            if let Err(e) = handle.await {
                let reason = if e.is_panic() {
                    "scan task panicked"
                } else {
                    "scan task cancelled"
                };
                warn!(service = %unit.service, reason, "scan unit crashed");
                reports.push(crashed_unit_report(&self.config, &unit, reason).await);
            }
        }

        let report = ScanReport::build(scan_id, started_at, Utc::now(), reports);
        info!(
            units = report.units.len(),
            passed = report.summary.passed,
            failed = report.summary.failed,
            errored = report.summary.errored,
            "scan complete"
        );
        report
    }
}

/// Load, discover, and check one unit. Never fails outward: every failure
/// mode ends as a [`UnitReport`], with per-check ERROR rows whenever a
/// compiled catalog is available to enumerate them.
async fn run_unit(
    registry: &ClientRegistry,
    config: &ScanConfig,
    unit: &ScanUnit,
    deadline: Option<Instant>,
) -> UnitReport {
    let provider = unit.provider;
    let service = unit.service.as_str();
    let region = unit.region.as_deref();
    debug!(unit = %unit.label(), "starting scan unit");

    let engine = match Engine::load(&unit.rules_path, config.clone()).await {
        Ok(engine) => engine,
        Err(e) => {
            return UnitReport::failed(
                provider,
                service,
                region,
                format!("rule document rejected: {e}"),
                Vec::new(),
            );
        }
    };

    let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
    if matches!(remaining, Some(left) if left.is_zero()) {
        return UnitReport::failed(
            provider,
            service,
            region,
            "timeout",
            engine.synthetic_errors("timeout"),
        );
    }

    let Some(factory) = registry.get(provider) else {
        let reason = format!("no client factory registered for provider '{provider}'");
        let rows = engine.synthetic_errors(&reason);
        return UnitReport::failed(provider, service, region, reason, rows);
    };

    let client = match factory.new_client(service, region).await {
        Ok(client) => client,
        Err(e) => {
            let reason = format!("client init failed: {e}");
            let rows = engine.synthetic_errors(&reason);
            return UnitReport::failed(provider, service, region, reason, rows);
        }
    };

    let results = match remaining {
        Some(budget) => {
            match tokio::time::timeout(budget, engine.run(client.as_ref(), region)).await {
                Ok(results) => results,
                Err(_) => {
                    return UnitReport::failed(
                        provider,
                        service,
                        region,
                        "timeout",
                        engine.synthetic_errors("timeout"),
                    );
                }
            }
        }
        None => engine.run(client.as_ref(), region).await,
    };

    UnitReport::ok(provider, service, region, results)
}

/// Report entry for a unit whose task died before sending a result. The
/// document was valid when the task started, so reloading it enumerates
/// the checks for synthetic ERROR rows; if the reload itself fails the
/// entry carries the unit-level reason alone.
async fn crashed_unit_report(config: &ScanConfig, unit: &ScanUnit, reason: &str) -> UnitReport {
    let rows = match Engine::load(&unit.rules_path, config.clone()).await {
        Ok(engine) => engine.synthetic_errors(reason),
        Err(_) => Vec::new(),
    };
    UnitReport::failed(
        unit.provider,
        &unit.service,
        unit.region.as_deref(),
        reason,
        rows,
    )
}
