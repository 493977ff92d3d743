//! Full scans against recorded snapshot fixtures on disk: the offline
//! path an operator uses to rehearse rules without cloud credentials.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;

use stratus_core::engine::config::ScanConfig;
use stratus_core::engine::outcome::CheckStatus;
use stratus_core::provider::{ClientRegistry, ProviderKind, SnapshotFactory};
use stratus_core::scan::{discover_rule_files, plan_units, Scanner};

const INSTANCE_RULES: &str = r#"
provider: aws
service: ec2
discovery:
  - discovery_id: instances
    calls:
      - action: list
    emit:
      items_for: instances[]
      item:
        id: "{{ item.id }}"
checks:
  - rule_id: ec2_instances_tagged
    for_each: instances
    severity: low
    conditions:
      - var: item.id
        operator: exists
"#;

async fn scan_snapshots(
    rules_root: &std::path::Path,
    snapshot_root: &std::path::Path,
    config: ScanConfig,
) -> stratus_core::report::ScanReport {
    let sources = discover_rule_files(rules_root).unwrap();
    let units = plan_units(&sources, &config);
    let mut registry = ClientRegistry::new();
    registry.register(Arc::new(SnapshotFactory::new(
        snapshot_root.join("aws"),
        ProviderKind::Aws,
    )));
    Scanner::new(registry, config).scan(units).await
}

#[tokio::test]
async fn scans_recorded_pages_and_recorded_failures() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let rules = dir.path().join("rules");
    let snaps = dir.path().join("snapshots");

    let paginated = common::BUCKET_RULES
        .replace("- action: list", "- action: list\n        paginate: true");
    common::write_rule_doc(&rules, "s3", &paginated);
    common::write_rule_doc(&rules, "ec2", INSTANCE_RULES);

    common::write_snapshot(
        &snaps,
        "aws/s3/global/s3/list_buckets.page-1.json",
        r#"{"buckets": [{"name": "a", "encryption": {"algorithm": "AES256"}}]}"#,
    );
    common::write_snapshot(
        &snaps,
        "aws/s3/global/s3/list_buckets.page-2.json",
        r#"{"buckets": [{"name": "b", "encryption": {"algorithm": "aws:kms"}}]}"#,
    );
    common::write_snapshot(
        &snaps,
        "aws/ec2/us-east-1/ec2/describe_instances.error.json",
        r#"{"error": "AccessDenied: not authorized to call DescribeInstances"}"#,
    );

    let report = scan_snapshots(&rules, &snaps, ScanConfig::default()).await;

    assert_eq!(report.units.len(), 2);

    // The recorded failure surfaces per check, not as a unit-level fault.
    let ec2 = &report.units[0];
    assert_eq!(ec2.label(), "ec2/us-east-1");
    assert!(ec2.error.is_none());
    assert_eq!(ec2.results.len(), 1);
    assert_eq!(ec2.results[0].status, CheckStatus::Error);
    assert!(ec2.results[0]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("AccessDenied"));

    // Both recorded pages feed the inventory.
    let s3 = &report.units[1];
    assert!(s3.error.is_none());
    assert_eq!(s3.results.len(), 2);
    assert_eq!(s3.results[0].resource_name, "a");
    assert_eq!(s3.results[0].status, CheckStatus::Pass);
    assert_eq!(s3.results[1].resource_name, "b");
    assert_eq!(s3.results[1].status, CheckStatus::Fail);

    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.errored, 1);
}

#[tokio::test]
async fn missing_region_snapshot_fails_client_init() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let rules = dir.path().join("rules");
    let snaps = dir.path().join("snapshots");

    common::write_rule_doc(&rules, "ec2", INSTANCE_RULES);
    common::write_snapshot(
        &snaps,
        "aws/ec2/us-east-1/ec2/describe_instances.json",
        r#"{"instances": []}"#,
    );

    let config = ScanConfig {
        regions: vec!["eu-west-1".to_string()],
        ..ScanConfig::default()
    };
    let report = scan_snapshots(&rules, &snaps, config).await;

    assert_eq!(report.units.len(), 1);
    let unit = &report.units[0];
    assert_eq!(unit.label(), "ec2/eu-west-1");
    let error = unit.error.as_deref().unwrap();
    assert!(error.contains("client init failed"));
    assert!(error.contains("no snapshot directory"));
    // The unit still reports one ERROR row per check.
    assert_eq!(unit.results.len(), 1);
    assert_eq!(unit.results[0].status, CheckStatus::Error);
}
