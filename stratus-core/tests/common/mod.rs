//! Test helper functions for integration tests
//!
//! Shared across test files using the tests/common/ pattern.

use std::fs;
use std::path::Path;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Write a rule document at the conventional
/// `services/<service>/rules/<service>.yaml` location under `root`.
#[allow(dead_code)]
pub fn write_rule_doc(root: &Path, service: &str, content: &str) {
    let dir = root.join("services").join(service).join("rules");
    fs::create_dir_all(&dir).expect("create rules directory");
    fs::write(dir.join(format!("{service}.yaml")), content).expect("write rule document");
}

/// Write a snapshot fixture at `relative` under `root`, creating parents.
#[allow(dead_code)]
pub fn write_snapshot(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("fixture parent")).expect("create fixture directory");
    fs::write(path, content).expect("write fixture");
}

/// A small bucket-encryption document: one discovery step, one check.
/// Bucket `a` passes, `b` fails, `c` errors (no encryption field at all).
#[allow(dead_code)]
pub const BUCKET_RULES: &str = r#"
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
        encryption: "{{ item.encryption }}"
checks:
  - rule_id: s3_bucket_encrypted
    severity: high
    title: Buckets use AES256 server-side encryption
    for_each: buckets
    conditions:
      - var: item.encryption.algorithm
        operator: equals
        expected: AES256
"#;

/// The canned response body matching [`BUCKET_RULES`].
#[allow(dead_code)]
pub fn bucket_response() -> serde_json::Value {
    serde_json::json!({
        "buckets": [
            {"name": "a", "encryption": {"algorithm": "AES256"}},
            {"name": "b", "encryption": {"algorithm": "aws:kms"}},
            {"name": "c"},
        ]
    })
}
