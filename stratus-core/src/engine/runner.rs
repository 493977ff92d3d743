//! Check execution over the discovered inventory.
//!
//! Classification is mechanical: a satisfied condition is PASS, a violated
//! one is FAIL, and anything unevaluable is ERROR. When the discovery step
//! behind a check failed, the check reports exactly one ERROR row carrying
//! the failure - never zero rows, which would read as a clean pass.

use tracing::debug;

use super::catalog::{Catalog, Check};
use super::condition::ConditionResult;
use super::config::ScanConfig;
use super::inventory::{item_context, Inventory, StepStatus};
use super::outcome::{resource_identity, CheckResult, CheckStatus, UNKNOWN_RESOURCE};
use super::value::Value;
use crate::provider::ProviderKind;

pub fn run_checks(
    catalog: &Catalog,
    inventory: &Inventory,
    config: &ScanConfig,
) -> Vec<CheckResult> {
    let mut results = Vec::new();
    for check in &catalog.checks {
        if !config.wants_check(&check.rule_id) {
            continue;
        }
        run_check(catalog.provider, check, inventory, config, &mut results);
    }
    results
}

fn run_check(
    provider: ProviderKind,
    check: &Check,
    inventory: &Inventory,
    config: &ScanConfig,
    results: &mut Vec<CheckResult>,
) {
    let before = results.len();
    match inventory.status(&check.for_each) {
        StepStatus::Error(reason) => {
            results.push(CheckResult::synthetic_error(
                &check.rule_id,
                check.severity,
                format!("discovery failed: {reason}"),
            ));
        }
        StepStatus::Done => {
            for item in inventory.items(&check.for_each) {
                let (resource_id, resource_name) = resource_identity(provider, item);
                if !config.wants_resource(&resource_name) {
                    continue;
                }
                let context = item_context(item);
                let evaluated_value = check
                    .conditions
                    .primary_var()
                    .map(|var| var.resolve(&context))
                    .unwrap_or(Value::Null);
                let (status, error_reason) = match check.conditions.evaluate(&context) {
                    ConditionResult::Satisfied => (CheckStatus::Pass, None),
                    ConditionResult::Violated => (CheckStatus::Fail, None),
                    ConditionResult::Error(reason) => (CheckStatus::Error, Some(reason)),
                };
                results.push(CheckResult {
                    rule_id: check.rule_id.clone(),
                    severity: check.severity,
                    resource_id,
                    resource_name,
                    status,
                    evaluated_value,
                    error_reason,
                });
            }
        }
        StepStatus::Pending | StepStatus::Running => {
            results.push(CheckResult::synthetic_error(
                &check.rule_id,
                check.severity,
                format!("discovery step '{}' did not run", check.for_each),
            ));
        }
    }
    debug!(
        rule_id = %check.rule_id,
        results = results.len() - before,
        "check evaluated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::Catalog;
    use crate::engine::inventory::Item;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    const RULES: &str = r#"
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
        versioning: "{{ item.versioning }}"
checks:
  - rule_id: S3_VERSIONING
    for_each: buckets
    severity: high
    conditions:
      var: item.versioning
      operator: equals
      expected: true
  - rule_id: S3_NAMED
    for_each: buckets
    severity: low
    conditions:
      var: item.name
      operator: exists
"#;

    fn bucket(name: &str, versioning: Option<bool>) -> Item {
        let mut item = Item::new();
        item.insert("name".to_string(), Value::from(name));
        item.insert(
            "versioning".to_string(),
            versioning.map(Value::from).unwrap_or(Value::Null),
        );
        item
    }

    fn inventory_with(items: Vec<Item>) -> Inventory {
        let mut inventory = Inventory::new();
        inventory.register("buckets");
        inventory.extend("buckets", items);
        inventory.mark_done("buckets");
        inventory
    }

    #[test]
    fn classifies_pass_fail_and_error_per_item() {
        let catalog = Catalog::parse_str(RULES).unwrap();
        let inventory = inventory_with(vec![
            bucket("good", Some(true)),
            bucket("bad", Some(false)),
            bucket("odd", None),
        ]);
        let results = run_checks(&catalog, &inventory, &ScanConfig::default());

        let versioning: Vec<_> = results
            .iter()
            .filter(|r| r.rule_id == "S3_VERSIONING")
            .collect();
        assert_eq!(versioning.len(), 3);
        assert_eq!(versioning[0].status, CheckStatus::Pass);
        assert_eq!(versioning[0].resource_name, "good");
        assert_eq!(versioning[0].evaluated_value, Value::Bool(true));
        assert_eq!(versioning[1].status, CheckStatus::Fail);
        assert_eq!(versioning[2].status, CheckStatus::Error);
        assert!(versioning[2]
            .error_reason
            .as_deref()
            .unwrap()
            .contains("item.versioning"));
    }

    #[test]
    fn discovery_failure_yields_exactly_one_error_row_per_check() {
        let catalog = Catalog::parse_str(RULES).unwrap();
        let mut inventory = Inventory::new();
        inventory.register("buckets");
        inventory.mark_error("buckets", "throttled");
        let results = run_checks(&catalog, &inventory, &ScanConfig::default());

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.status, CheckStatus::Error);
            assert_eq!(result.resource_id, UNKNOWN_RESOURCE);
            assert!(result
                .error_reason
                .as_deref()
                .unwrap()
                .contains("discovery failed: throttled"));
        }
    }

    #[test]
    fn empty_inventory_yields_no_rows() {
        let catalog = Catalog::parse_str(RULES).unwrap();
        let inventory = inventory_with(vec![]);
        assert!(run_checks(&catalog, &inventory, &ScanConfig::default()).is_empty());
    }

    #[test]
    fn check_filter_limits_rules() {
        let catalog = Catalog::parse_str(RULES).unwrap();
        let inventory = inventory_with(vec![bucket("good", Some(true))]);
        let config = ScanConfig {
            check_filter: Some(BTreeSet::from(["S3_NAMED".to_string()])),
            ..ScanConfig::default()
        };
        let results = run_checks(&catalog, &inventory, &config);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "S3_NAMED");
    }

    #[test]
    fn resource_filter_matches_names_case_insensitively() {
        let catalog = Catalog::parse_str(RULES).unwrap();
        let inventory = inventory_with(vec![
            bucket("prod-logs", Some(true)),
            bucket("dev-logs", Some(true)),
        ]);
        let config = ScanConfig {
            resource_filter: Some("PROD".to_string()),
            ..ScanConfig::default()
        };
        let results = run_checks(&catalog, &inventory, &config);

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.resource_name == "prod-logs"));
    }
}
