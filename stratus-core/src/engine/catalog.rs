//! Rule catalog loading, validation, and compilation.
//!
//! A rule document is YAML with three top-level sections: identity
//! (`version`/`provider`/`service`), `discovery` (API call steps that
//! build the inventory), and `checks` (conditions over inventory slices).
//! Everything that can fail at scan time for structural reasons is
//! rejected here instead: unknown operators, malformed templates, bad
//! regexes, dangling or cyclic `for_each` references, duplicate ids.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::condition::{ConditionNode, RawCondition};
use super::outcome::Severity;
use super::template::{PathExpr, TemplateValue};
use super::value::Value;
use crate::provider::ProviderKind;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read rule file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule document: {0}")]
    Syntax(#[from] serde_yaml_ng::Error),

    #[error("invalid rule document: {0}")]
    Validation(String),
}

fn invalid(message: impl Into<String>) -> CatalogError {
    CatalogError::Validation(message.into())
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    version: Value,
    provider: String,
    service: String,
    #[serde(default)]
    discovery: Vec<RawStep>,
    #[serde(default)]
    checks: Vec<RawCheck>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    discovery_id: String,
    #[serde(default)]
    for_each: Option<String>,
    #[serde(default)]
    calls: Vec<RawCall>,
    emit: RawEmit,
}

#[derive(Debug, Deserialize)]
struct RawCall {
    #[serde(default)]
    service: Option<String>,
    action: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    on_error: ErrorPolicy,
    #[serde(default)]
    paginate: bool,
}

#[derive(Debug, Deserialize)]
struct RawEmit {
    items_for: String,
    item: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    #[serde(alias = "check_id")]
    rule_id: String,
    for_each: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    conditions: RawCondition,
}

/// What to do when an API call fails at scan time. Adapter resolution
/// failures and pagination overruns fail the step regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Treat the call as having returned nothing and keep going.
    Continue,
    /// Fail the whole step; its checks report a single ERROR.
    #[default]
    Fail,
}

#[derive(Debug, Clone)]
pub struct ApiCall {
    pub service: String,
    pub action: String,
    pub params: TemplateValue,
    pub on_error: ErrorPolicy,
    pub paginate: bool,
}

#[derive(Debug, Clone)]
pub struct Emit {
    pub items_for: PathExpr,
    pub item: BTreeMap<String, TemplateValue>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryStep {
    pub discovery_id: String,
    /// Run once per item of this step instead of once per unit.
    pub for_each: Option<String>,
    pub calls: Vec<ApiCall>,
    pub emit: Emit,
}

#[derive(Debug, Clone)]
pub struct Check {
    pub rule_id: String,
    pub for_each: String,
    pub severity: Severity,
    pub title: Option<String>,
    pub description: Option<String>,
    pub conditions: ConditionNode,
}

/// A compiled rule document. `steps` is already topologically ordered, so
/// executing it front to back never reads an unfinished dependency.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub version: String,
    pub provider: ProviderKind,
    pub service: String,
    pub steps: Vec<DiscoveryStep>,
    pub checks: Vec<Check>,
}

/// Item field reserved for the fan-out parent linkage.
pub const PARENT_FIELD: &str = "parent";

impl Catalog {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CatalogError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let catalog = Self::parse_str(&content)?;
        debug!(
            path = %path.display(),
            service = %catalog.service,
            steps = catalog.steps.len(),
            checks = catalog.checks.len(),
            "rule catalog loaded"
        );
        Ok(catalog)
    }

    pub fn parse_str(content: &str) -> Result<Self, CatalogError> {
        let raw: RawDocument = serde_yaml_ng::from_str(content)?;
        Self::compile(raw)
    }

    /// Cheap identity parse used during unit planning, before the full
    /// document is validated.
    pub fn peek(content: &str) -> Result<(ProviderKind, String), CatalogError> {
        #[derive(Deserialize)]
        struct Header {
            provider: String,
            service: String,
        }
        let header: Header = serde_yaml_ng::from_str(content)?;
        let provider = header.provider.parse::<ProviderKind>().map_err(invalid)?;
        Ok((provider, header.service))
    }

    fn compile(raw: RawDocument) -> Result<Self, CatalogError> {
        let provider = raw.provider.parse::<ProviderKind>().map_err(invalid)?;
        if raw.service.trim().is_empty() {
            return Err(invalid("service must not be empty"));
        }

        let ordered = order_steps(&raw.discovery)?;
        let mut steps = Vec::with_capacity(ordered.len());
        for step in ordered {
            steps.push(compile_step(step, &raw.service)?);
        }

        let declared: BTreeSet<&str> = steps.iter().map(|s| s.discovery_id.as_str()).collect();
        let mut checks = Vec::with_capacity(raw.checks.len());
        let mut seen_rules = BTreeSet::new();
        for check in &raw.checks {
            if check.rule_id.trim().is_empty() {
                return Err(invalid("check is missing a rule_id"));
            }
            if !seen_rules.insert(check.rule_id.as_str()) {
                return Err(invalid(format!("duplicate rule_id '{}'", check.rule_id)));
            }
            if !declared.contains(check.for_each.as_str()) {
                return Err(invalid(format!(
                    "check '{}' references undeclared discovery_id '{}'",
                    check.rule_id, check.for_each
                )));
            }
            checks.push(compile_check(check)?);
        }

        Ok(Catalog {
            version: match &raw.version {
                Value::Null => "1".to_string(),
                other => other.render(),
            },
            provider,
            service: raw.service,
            steps,
            checks,
        })
    }
}

/// Stable topological order: repeatedly take the first document-order step
/// whose dependency is already placed. Also rejects duplicates, dangling
/// references, self-references, and cycles.
fn order_steps(steps: &[RawStep]) -> Result<Vec<&RawStep>, CatalogError> {
    let mut seen = BTreeSet::new();
    for step in steps {
        if step.discovery_id.trim().is_empty() {
            return Err(invalid("discovery step is missing a discovery_id"));
        }
        if !seen.insert(step.discovery_id.as_str()) {
            return Err(invalid(format!(
                "duplicate discovery_id '{}'",
                step.discovery_id
            )));
        }
    }
    for step in steps {
        if let Some(target) = &step.for_each {
            if target == &step.discovery_id {
                return Err(invalid(format!(
                    "discovery step '{}' depends on itself",
                    step.discovery_id
                )));
            }
            if !seen.contains(target.as_str()) {
                return Err(invalid(format!(
                    "discovery step '{}' references undeclared discovery_id '{}'",
                    step.discovery_id, target
                )));
            }
        }
    }

    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut ordered = Vec::with_capacity(steps.len());
    let mut remaining: Vec<&RawStep> = steps.iter().collect();
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|step| match &step.for_each {
            None => true,
            Some(target) => placed.contains(target.as_str()),
        });
        match ready {
            Some(idx) => {
                let step = remaining.remove(idx);
                placed.insert(step.discovery_id.as_str());
                ordered.push(step);
            }
            None => {
                let stuck: Vec<&str> = remaining.iter().map(|s| s.discovery_id.as_str()).collect();
                return Err(invalid(format!(
                    "dependency cycle among discovery steps: {}",
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(ordered)
}

fn compile_step(raw: &RawStep, default_service: &str) -> Result<DiscoveryStep, CatalogError> {
    let id = &raw.discovery_id;
    if raw.calls.is_empty() {
        return Err(invalid(format!("discovery step '{id}' has no calls")));
    }

    let mut calls = Vec::with_capacity(raw.calls.len());
    for call in &raw.calls {
        if call.action.trim().is_empty() {
            return Err(invalid(format!(
                "discovery step '{id}' has a call without an action"
            )));
        }
        let params = TemplateValue::compile(&call.params).map_err(|e| {
            invalid(format!("discovery step '{id}' params for '{}': {e}", call.action))
        })?;
        calls.push(ApiCall {
            service: call
                .service
                .clone()
                .unwrap_or_else(|| default_service.to_string()),
            action: call.action.clone(),
            params,
            on_error: call.on_error,
            paginate: call.paginate,
        });
    }

    if raw.emit.item.is_empty() {
        return Err(invalid(format!(
            "discovery step '{id}' emit.item must name at least one field"
        )));
    }
    if raw.emit.item.contains_key(PARENT_FIELD) {
        return Err(invalid(format!(
            "discovery step '{id}' emit.item uses the reserved field '{PARENT_FIELD}'"
        )));
    }
    let items_for = PathExpr::compile(&raw.emit.items_for)
        .map_err(|e| invalid(format!("discovery step '{id}' emit.items_for: {e}")))?;
    let mut item = BTreeMap::new();
    for (field, value) in &raw.emit.item {
        let compiled = TemplateValue::compile(value)
            .map_err(|e| invalid(format!("discovery step '{id}' emit.item '{field}': {e}")))?;
        item.insert(field.clone(), compiled);
    }

    Ok(DiscoveryStep {
        discovery_id: raw.discovery_id.clone(),
        for_each: raw.for_each.clone(),
        calls,
        emit: Emit { items_for, item },
    })
}

fn compile_check(raw: &RawCheck) -> Result<Check, CatalogError> {
    let severity = match &raw.severity {
        Some(s) => s
            .parse::<Severity>()
            .map_err(|e| invalid(format!("check '{}': {e}", raw.rule_id)))?,
        None => Severity::default(),
    };
    let conditions = ConditionNode::compile(&raw.conditions)
        .map_err(|e| invalid(format!("check '{}': {e}", raw.rule_id)))?;
    Ok(Check {
        rule_id: raw.rule_id.clone(),
        for_each: raw.for_each.clone(),
        severity,
        title: raw.title.clone(),
        description: raw.description.clone(),
        conditions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BUCKET_RULES: &str = r#"
version: "1.0"
provider: aws
service: s3
discovery:
  - discovery_id: s3_buckets
    calls:
      - action: list
        paginate: true
    emit:
      items_for: buckets[]
      item:
        name: "{{ item.name }}"
        public_access_block: "{{ item.public_access_block }}"
checks:
  - rule_id: S3_PUBLIC_ACCESS
    for_each: s3_buckets
    severity: high
    conditions:
      var: item.public_access_block
      operator: equals
      expected: true
"#;

    #[test]
    fn compiles_a_minimal_document() {
        let catalog = Catalog::parse_str(BUCKET_RULES).unwrap();
        assert_eq!(catalog.provider, ProviderKind::Aws);
        assert_eq!(catalog.service, "s3");
        assert_eq!(catalog.version, "1.0");
        assert_eq!(catalog.steps.len(), 1);
        assert_eq!(catalog.checks.len(), 1);
        assert_eq!(catalog.checks[0].severity, Severity::High);
        // Calls inherit the document service when they name none.
        assert_eq!(catalog.steps[0].calls[0].service, "s3");
    }

    #[test]
    fn condition_lists_parse_as_implicit_all() {
        let catalog = Catalog::parse_str(
            r#"
provider: aws
service: s3
discovery:
  - discovery_id: buckets
    calls:
      - action: list
    emit:
      items_for: buckets[]
      item: {name: "{{ item.name }}"}
checks:
  - rule_id: s3_bucket_hardened
    for_each: buckets
    conditions:
      - var: item.versioning
        operator: equals
        expected: true
      - var: item.logging
        operator: exists
"#,
        )
        .unwrap();
        match &catalog.checks[0].conditions {
            ConditionNode::All(children) => assert_eq!(children.len(), 2),
            other => panic!("expected an all composite, got {other:?}"),
        }
    }

    #[test]
    fn steps_are_reordered_topologically() {
        let catalog = Catalog::parse_str(
            r#"
provider: aws
service: ec2
discovery:
  - discovery_id: volumes
    for_each: instances
    calls:
      - action: describe_volumes
        params: {instance: "{{ parent.id }}"}
    emit:
      items_for: volumes[]
      item: {id: "{{ item.volume_id }}"}
  - discovery_id: instances
    calls:
      - action: list
    emit:
      items_for: reservations[].instances[]
      item: {id: "{{ item.instance_id }}"}
checks: []
"#,
        )
        .unwrap();
        let ids: Vec<_> = catalog
            .steps
            .iter()
            .map(|s| s.discovery_id.as_str())
            .collect();
        assert_eq!(ids, vec!["instances", "volumes"]);
    }

    #[test]
    fn dangling_for_each_is_rejected() {
        let err = Catalog::parse_str(
            r#"
provider: aws
service: s3
discovery:
  - discovery_id: policies
    for_each: buckets
    calls:
      - action: get_bucket_policy
    emit:
      items_for: statements[]
      item: {sid: "{{ item.sid }}"}
checks: []
"#,
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("references undeclared discovery_id 'buckets'"));
    }

    #[test]
    fn check_against_unknown_step_is_rejected() {
        let err = Catalog::parse_str(
            r#"
provider: aws
service: s3
discovery: []
checks:
  - rule_id: R1
    for_each: buckets
    conditions: {var: item.x, operator: exists}
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("undeclared discovery_id 'buckets'"));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = Catalog::parse_str(
            r#"
provider: aws
service: s3
discovery:
  - discovery_id: a
    for_each: b
    calls: [{action: get_a}]
    emit: {items_for: 'xs[]', item: {id: "{{ item.id }}"}}
  - discovery_id: b
    for_each: a
    calls: [{action: get_b}]
    emit: {items_for: 'xs[]', item: {id: "{{ item.id }}"}}
checks: []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
        assert!(err.to_string().contains('a'));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Catalog::parse_str(
            r#"
provider: aws
service: s3
discovery:
  - discovery_id: buckets
    calls: [{action: list}]
    emit: {items_for: 'buckets[]', item: {name: "{{ item.name }}"}}
  - discovery_id: buckets
    calls: [{action: list}]
    emit: {items_for: 'buckets[]', item: {name: "{{ item.name }}"}}
checks: []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate discovery_id 'buckets'"));
    }

    #[test]
    fn unknown_operator_fails_at_load_time() {
        let err = Catalog::parse_str(
            r#"
provider: aws
service: s3
discovery:
  - discovery_id: buckets
    calls: [{action: list}]
    emit: {items_for: 'buckets[]', item: {name: "{{ item.name }}"}}
checks:
  - rule_id: R1
    for_each: buckets
    conditions: {var: item.x, operator: approximately, expected: 1}
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown operator 'approximately'"));
    }

    #[test]
    fn reserved_parent_field_is_rejected() {
        let err = Catalog::parse_str(
            r#"
provider: aws
service: s3
discovery:
  - discovery_id: buckets
    calls: [{action: list}]
    emit:
      items_for: buckets[]
      item:
        name: "{{ item.name }}"
        parent: "{{ item.owner }}"
checks: []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved field 'parent'"));
    }

    #[test]
    fn check_id_alias_and_default_severity() {
        let catalog = Catalog::parse_str(
            r#"
provider: gcp
service: storage
discovery:
  - discovery_id: buckets
    calls: [{action: list}]
    emit: {items_for: 'items[]', item: {name: "{{ item.name }}"}}
checks:
  - check_id: GCP_STORAGE_001
    for_each: buckets
    conditions: {var: item.name, operator: exists}
"#,
        )
        .unwrap();
        assert_eq!(catalog.checks[0].rule_id, "GCP_STORAGE_001");
        assert_eq!(catalog.checks[0].severity, Severity::Medium);
    }

    #[test]
    fn peek_reads_identity_without_full_validation() {
        // The check body is structurally broken, peek does not care.
        let content = "provider: azure\nservice: network\nchecks: [{rule_id: X}]\n";
        let (provider, service) = Catalog::peek(content).unwrap();
        assert_eq!(provider, ProviderKind::Azure);
        assert_eq!(service, "network");
    }

    #[tokio::test]
    async fn load_reports_missing_files_with_the_path() {
        let err = Catalog::load("/nonexistent/rules.yaml").await.unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/rules.yaml"));
    }
}
