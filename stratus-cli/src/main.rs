//! Stratus - multi-cloud compliance scanning from declarative rule documents
//!
//! Discovers rule documents, expands them into scan units, runs the units
//! against recorded API snapshots, and renders the resulting report.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, ValueEnum};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stratus_core::engine::catalog::Catalog;
use stratus_core::engine::config::{ScanConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_PAGES};
use stratus_core::provider::{ClientRegistry, SnapshotFactory};
use stratus_core::report::ScanReport;
use stratus_core::scan::{discover_rule_files, list_rule_documents, plan_units, Scanner};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "stratus",
    about = "Multi-cloud compliance scanning from declarative rule documents",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run compliance checks against recorded API snapshots
    Scan(ScanArgs),

    /// List discovered rule documents and their checks
    Rules {
        /// Directory containing rule documents
        #[clap(long, default_value = "./rules")]
        rules_dir: PathBuf,

        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },

    /// Validate rule documents without scanning
    Validate {
        /// Directory containing rule documents
        #[clap(long, default_value = "./rules")]
        rules_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Directory containing rule documents (services/<name>/rules/<name>.yaml)
    #[clap(long, default_value = "./rules")]
    rules_dir: PathBuf,

    /// Directory containing recorded API snapshots, one subtree per provider
    #[clap(long, default_value = "./snapshots")]
    snapshot_dir: PathBuf,

    /// Only scan these services (comma-separated)
    #[clap(long, value_delimiter = ',')]
    services: Option<Vec<String>>,

    /// Regions to scan regional services in (comma-separated)
    #[clap(long, value_delimiter = ',')]
    regions: Option<Vec<String>>,

    /// Only run these check ids (comma-separated)
    #[clap(long, value_delimiter = ',')]
    checks: Option<Vec<String>>,

    /// Only report resources whose name contains this substring
    #[clap(long)]
    resource: Option<String>,

    /// Write the full JSON report bundle to this path
    #[clap(long)]
    report: Option<PathBuf>,

    /// Maximum scan units running at once
    #[clap(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    max_concurrency: usize,

    /// Abandon outstanding work after this many seconds
    #[clap(long)]
    deadline_secs: Option<u64>,

    /// Pagination ceiling per API call
    #[clap(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: u32,
}

/// Initialize tracing from the --log-level flag. Logs go to stderr so
/// tables and JSON on stdout stay clean.
fn initialize_tracing(log_level: &LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.to_filter_directive()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level);

    match cli.command {
        Command::Scan(args) => scan_command(args).await,
        Command::Rules { rules_dir, json } => rules_command(rules_dir, json).await,
        Command::Validate { rules_dir } => validate_command(rules_dir).await,
    }
}

async fn scan_command(args: ScanArgs) -> Result<()> {
    let sources = discover_rule_files(&args.rules_dir)?;
    if sources.is_empty() {
        bail!(
            "no rule documents found under {}",
            args.rules_dir.display()
        );
    }

    let config = ScanConfig {
        max_concurrency: args.max_concurrency,
        max_pages: args.max_pages,
        deadline: args.deadline_secs.map(Duration::from_secs),
        check_filter: args.checks.map(|ids| ids.into_iter().collect()),
        resource_filter: args.resource,
        services: args.services.map(|names| names.into_iter().collect()),
        regions: args.regions.unwrap_or_default(),
    };

    let units = plan_units(&sources, &config);
    if units.is_empty() {
        bail!("filters matched no scan units");
    }

    let mut registry = ClientRegistry::new();
    let providers: BTreeSet<_> = units.iter().map(|unit| unit.provider).collect();
    for provider in providers {
        let root = args.snapshot_dir.join(provider.as_str());
        registry.register(Arc::new(SnapshotFactory::new(root, provider)));
    }

    info!(units = units.len(), "starting scan");
    let scanner = Scanner::new(registry, config);
    let report = scanner.scan(units).await;

    print_report(&report);

    if let Some(path) = &args.report {
        report.write_bundle(path).await?;
        println!("\nReport written to {}", path.display());
    }

    // PASS/FAIL counts never affect the exit code; only fatal
    // configuration errors do.
    Ok(())
}

// Table row structure for the per-unit scan summary
#[derive(Tabled)]
struct UnitRow {
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Pass")]
    pass: usize,
    #[tabled(rename = "Fail")]
    fail: usize,
    #[tabled(rename = "Error")]
    error: usize,
    #[tabled(rename = "Note")]
    note: String,
}

fn print_report(report: &ScanReport) {
    let rows: Vec<UnitRow> = report
        .units
        .iter()
        .map(|unit| UnitRow {
            provider: unit.provider.to_string(),
            unit: unit.label(),
            pass: unit.results.iter().filter(|r| r.status.is_pass()).count(),
            fail: unit.results.iter().filter(|r| r.status.is_fail()).count(),
            error: unit.results.iter().filter(|r| r.status.is_error()).count(),
            note: unit.error.clone().unwrap_or_default(),
        })
        .collect();

    if !rows.is_empty() {
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        println!("{table}");
    }

    let summary = &report.summary;
    println!(
        "\n{} checks evaluated: {} passed, {} failed, {} errored",
        summary.total(),
        summary.passed,
        summary.failed,
        summary.errored
    );
    if !summary.failures_by_severity.is_empty() {
        let breakdown: Vec<String> = summary
            .failures_by_severity
            .iter()
            .map(|(severity, count)| format!("{severity}={count}"))
            .collect();
        println!("Failures by severity: {}", breakdown.join(" "));
    }
}

// Table row structure for rule document listing
#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Checks")]
    checks: usize,
    #[tabled(rename = "Steps")]
    steps: usize,
    #[tabled(rename = "Path")]
    path: String,
}

async fn rules_command(rules_dir: PathBuf, json: bool) -> Result<()> {
    let sources = discover_rule_files(&rules_dir)?;
    if sources.is_empty() {
        eprintln!("No rule documents found under {}", rules_dir.display());
        return Ok(());
    }

    let mut catalogs = Vec::new();
    for source in &sources {
        match Catalog::load(&source.path).await {
            Ok(catalog) => catalogs.push((source, catalog)),
            Err(e) => {
                eprintln!("Warning: failed to load {}: {e}", source.path.display());
            }
        }
    }

    if json {
        let documents: Vec<_> = catalogs
            .iter()
            .map(|(source, catalog)| {
                serde_json::json!({
                    "service": catalog.service,
                    "provider": catalog.provider,
                    "path": source.path.display().to_string(),
                    "steps": catalog.steps.len(),
                    "checks": catalog.checks.iter().map(|check| {
                        serde_json::json!({
                            "rule_id": check.rule_id,
                            "severity": check.severity,
                            "title": check.title,
                        })
                    }).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&documents)?);
        return Ok(());
    }

    let rows: Vec<RuleRow> = catalogs
        .iter()
        .map(|(source, catalog)| RuleRow {
            service: catalog.service.clone(),
            provider: catalog.provider.to_string(),
            checks: catalog.checks.len(),
            steps: catalog.steps.len(),
            path: source.path.display().to_string(),
        })
        .collect();

    println!("Found {} rule document(s)\n", rows.len());
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");

    Ok(())
}

async fn validate_command(rules_dir: PathBuf) -> Result<()> {
    let documents = list_rule_documents(&rules_dir)?;
    if documents.is_empty() {
        eprintln!("No rule documents found under {}", rules_dir.display());
        return Ok(());
    }

    let mut failures = 0usize;
    for path in &documents {
        match Catalog::load(path).await {
            Ok(catalog) => {
                println!(
                    "✅ {} ({}/{}, {} checks)",
                    path.display(),
                    catalog.provider,
                    catalog.service,
                    catalog.checks.len()
                );
            }
            Err(e) => {
                failures += 1;
                println!("❌ {}: {e}", path.display());
            }
        }
    }

    if failures > 0 {
        bail!(
            "{failures} of {} rule document(s) failed validation",
            documents.len()
        );
    }
    println!("\nAll {} rule document(s) valid", documents.len());
    Ok(())
}
