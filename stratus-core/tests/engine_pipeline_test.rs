//! End-to-end engine tests: compiled catalog through discovery to check
//! results, against scripted in-memory clients.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use stratus_core::engine::catalog::Catalog;
use stratus_core::engine::config::ScanConfig;
use stratus_core::engine::outcome::{CheckStatus, UNKNOWN_RESOURCE};
use stratus_core::engine::value::Value;
use stratus_core::engine::Engine;
use stratus_core::provider::{MemoryClient, ProviderKind};

fn engine(yaml: &str) -> Engine {
    Engine::new(Catalog::parse_str(yaml).unwrap(), ScanConfig::default())
}

#[tokio::test]
async fn classifies_pass_fail_and_error_in_one_run() {
    common::init_test_logging();
    let client = MemoryClient::builder(ProviderKind::Aws)
        .response("s3", "list_buckets", common::bucket_response())
        .build();

    let results = engine(common::BUCKET_RULES).run(&client, None).await;

    assert_eq!(results.len(), 3);

    // Bucket `a` satisfies the condition.
    assert_eq!(results[0].status, CheckStatus::Pass);
    assert_eq!(results[0].resource_id, "a");
    assert_eq!(results[0].evaluated_value, Value::from("AES256"));
    assert!(results[0].error_reason.is_none());

    // Bucket `b` has the field with the wrong value: a definitive FAIL.
    assert_eq!(results[1].status, CheckStatus::Fail);
    assert_eq!(results[1].evaluated_value, Value::from("aws:kms"));
    assert!(results[1].error_reason.is_none());

    // Bucket `c` has no encryption data at all: the check cannot be
    // evaluated, which is ERROR, never FAIL.
    assert_eq!(results[2].status, CheckStatus::Error);
    assert!(results[2]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("did not resolve"));
}

const CHAINED_RULES: &str = r#"
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
  - discovery_id: volumes
    for_each: instances
    calls:
      - service: ebs
        action: list
    emit:
      items_for: volumes[]
      item:
        id: "{{ item.id }}"
checks:
  - rule_id: instances_have_ids
    for_each: instances
    conditions:
      - var: item.id
        operator: exists
  - rule_id: volumes_have_ids
    for_each: volumes
    conditions:
      - var: item.id
        operator: exists
"#;

#[tokio::test]
async fn failed_discovery_yields_exactly_one_error_row_per_check() {
    common::init_test_logging();
    let client = MemoryClient::builder(ProviderKind::Aws)
        .failure("ec2", "describe_instances", "rate exceeded")
        .build();

    let results = engine(CHAINED_RULES).run(&client, None).await;

    // One synthetic row per check, both checks covered, nothing more.
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.resource_id, UNKNOWN_RESOURCE);
    }
    assert_eq!(results[0].rule_id, "instances_have_ids");
    assert!(results[0]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("rate exceeded"));

    // The dependent step reports the cascade, not a fresh API failure.
    assert_eq!(results[1].rule_id, "volumes_have_ids");
    assert!(results[1]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("parent step 'instances' failed"));

    // Only the first call was ever issued.
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn dangling_for_each_is_rejected_before_any_call() {
    common::init_test_logging();
    let client = MemoryClient::builder(ProviderKind::Aws)
        .response("s3", "list_buckets", json!({"buckets": []}))
        .build();

    let err = Catalog::parse_str(
        r#"
provider: aws
service: s3
discovery:
  - discovery_id: buckets
    calls:
      - action: list
    emit:
      items_for: buckets[]
      item:
        name: "{{ item.name }}"
checks:
  - rule_id: orphan_check
    for_each: nowhere
    conditions:
      - var: item.name
        operator: exists
"#,
    )
    .unwrap_err();

    assert!(err.to_string().contains("undeclared discovery_id 'nowhere'"));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn repeated_runs_are_byte_identical() {
    common::init_test_logging();
    let client = MemoryClient::builder(ProviderKind::Aws)
        .response("s3", "list_buckets", common::bucket_response())
        .build();
    let engine = engine(common::BUCKET_RULES);

    let first = serde_json::to_string(&engine.run(&client, None).await).unwrap();
    let second = serde_json::to_string(&engine.run(&client, None).await).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn paginated_discovery_evaluates_every_page() {
    common::init_test_logging();
    let client = MemoryClient::builder(ProviderKind::Aws)
        .pages(
            "s3",
            "list_buckets",
            vec![
                json!({"buckets": [{"name": "a", "encryption": {"algorithm": "AES256"}}]}),
                json!({"buckets": [{"name": "d", "encryption": {"algorithm": "AES256"}}]}),
            ],
        )
        .build();

    let rules = common::BUCKET_RULES.replace("- action: list", "- action: list\n        paginate: true");
    let results = engine(&rules).run(&client, None).await;

    let ids: Vec<&str> = results.iter().map(|r| r.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "d"]);
    assert!(results.iter().all(|r| r.status.is_pass()));
    assert_eq!(client.call_count(), 2);
}
