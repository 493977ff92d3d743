//! Snapshot provider.
//!
//! Serves recorded API responses from a directory tree, so scans run
//! against captured account state without cloud credentials. The layout
//! under the factory root is:
//!
//! ```text
//! <root>/<service>/<region or "global">/<sub_client>/<method>.json
//! <root>/<service>/<region or "global">/<sub_client>/<method>.page-1.json   (paged)
//! <root>/<service>/<region or "global">/<sub_client>/<method>.error.json   (recorded failure)
//! <root>/<service>/<region or "global">/<method>.json                      (top-level method)
//! ```
//!
//! Paged fixtures are served in index order with the next index as the
//! continuation token. An `.error.json` fixture shadows any recorded
//! pages for the same method; its `error` (or `message`) field becomes
//! the failure text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use super::{
    ApiResponse, CapabilitySet, ClientFactory, CloudClient, Invoker, ProviderError, ProviderKind,
};
use crate::engine::value::Value;

enum Fixture {
    Pages(Vec<PathBuf>),
    Error(PathBuf),
}

enum Part {
    Single,
    Page(usize),
    Error,
}

/// Splits a file stem into the recorded method name and which part of
/// the recording the file holds.
fn classify(stem: &str) -> (String, Part) {
    if let Some(method) = stem.strip_suffix(".error") {
        return (method.to_string(), Part::Error);
    }
    if let Some((method, index)) = stem.rsplit_once(".page-") {
        if let Ok(index) = index.parse::<usize>() {
            return (method.to_string(), Part::Page(index));
        }
    }
    (stem.to_string(), Part::Single)
}

#[derive(Default)]
struct FixtureEntry {
    single: Option<PathBuf>,
    pages: BTreeMap<usize, PathBuf>,
    error: Option<PathBuf>,
}

impl FixtureEntry {
    fn finish(self) -> Fixture {
        if let Some(path) = self.error {
            return Fixture::Error(path);
        }
        if !self.pages.is_empty() {
            return Fixture::Pages(self.pages.into_values().collect());
        }
        Fixture::Pages(self.single.into_iter().collect())
    }
}

pub struct SnapshotClient {
    provider: ProviderKind,
    capabilities: CapabilitySet,
    fixtures: BTreeMap<(String, String), Fixture>,
}

impl SnapshotClient {
    /// Scans `unit_dir` for fixtures. Method files sit either directly in
    /// the directory (top-level methods) or one sub-client directory down.
    pub fn open(provider: ProviderKind, unit_dir: &Path) -> Result<Self, ProviderError> {
        let mut entries: BTreeMap<(String, String), FixtureEntry> = BTreeMap::new();

        for entry in WalkDir::new(unit_dir)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let sub_client = if entry.depth() == 2 {
                match path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                }
            } else {
                String::new()
            };

            let (method, part) = classify(stem);
            let slot = entries.entry((sub_client, method)).or_default();
            match part {
                Part::Single => slot.single = Some(path.to_path_buf()),
                Part::Page(index) => {
                    slot.pages.insert(index, path.to_path_buf());
                }
                Part::Error => slot.error = Some(path.to_path_buf()),
            }
        }

        let mut capabilities = CapabilitySet::new();
        let mut fixtures = BTreeMap::new();
        for ((sub_client, method), entry) in entries {
            if sub_client.is_empty() {
                capabilities.add_root(&method);
            } else {
                capabilities.add(&sub_client, &method);
            }
            fixtures.insert((sub_client, method), entry.finish());
        }

        debug!(
            unit_dir = %unit_dir.display(),
            fixtures = fixtures.len(),
            "opened snapshot unit"
        );

        Ok(Self {
            provider,
            capabilities,
            fixtures,
        })
    }
}

async fn read_fixture(path: &Path) -> Result<Value, ProviderError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ProviderError::SnapshotRead {
            path: path.to_path_buf(),
            source,
        })?;
    let json: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|source| ProviderError::SnapshotDecode {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Value::from(json))
}

#[async_trait]
impl CloudClient for SnapshotClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn invoke(
        &self,
        invoker: &Invoker,
        _params: &Value,
        page_token: Option<&str>,
    ) -> Result<ApiResponse, ProviderError> {
        let key = (
            invoker.sub_client.clone().unwrap_or_default(),
            invoker.method.clone(),
        );
        let fixture = self
            .fixtures
            .get(&key)
            .ok_or_else(|| ProviderError::MissingResponse(invoker.to_string()))?;

        match fixture {
            Fixture::Pages(pages) => {
                let index = page_token
                    .and_then(|token| token.parse::<usize>().ok())
                    .unwrap_or(0);
                let path = pages
                    .get(index)
                    .ok_or_else(|| ProviderError::MissingResponse(invoker.to_string()))?;
                let body = read_fixture(path).await?;
                let next_token = (index + 1 < pages.len()).then(|| (index + 1).to_string());
                Ok(ApiResponse::page(body, next_token))
            }
            Fixture::Error(path) => {
                let body = read_fixture(path).await?;
                let message = match body.get("error").or_else(|| body.get("message")) {
                    Some(text) if !text.is_absent() => text.render(),
                    _ => "recorded failure".to_string(),
                };
                Err(ProviderError::call(invoker, message))
            }
        }
    }
}

/// Builds [`SnapshotClient`]s from `<root>/<service>/<region>` directories.
pub struct SnapshotFactory {
    root: PathBuf,
    provider: ProviderKind,
}

impl SnapshotFactory {
    pub fn new(root: impl Into<PathBuf>, provider: ProviderKind) -> Self {
        Self {
            root: root.into(),
            provider,
        }
    }
}

#[async_trait]
impl ClientFactory for SnapshotFactory {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn new_client(
        &self,
        service: &str,
        region: Option<&str>,
    ) -> Result<Arc<dyn CloudClient>, ProviderError> {
        let unit_dir = self
            .root
            .join(service)
            .join(region.unwrap_or("global"));
        if !unit_dir.is_dir() {
            return Err(ProviderError::Unsupported(format!(
                "no snapshot directory at {}",
                unit_dir.display()
            )));
        }
        let client = SnapshotClient::open(self.provider, &unit_dir)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write_fixture(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn serves_sub_client_and_root_fixtures() {
        let tmp = TempDir::new().unwrap();
        write_fixture(tmp.path(), "s3/list_buckets.json", r#"{"buckets": [{"name": "a"}]}"#);
        write_fixture(tmp.path(), "whoami.json", r#"{"account": "42"}"#);

        let client = SnapshotClient::open(ProviderKind::Aws, tmp.path()).unwrap();
        assert!(client.capabilities().has("s3", "list_buckets"));
        assert!(client.capabilities().has_root("whoami"));

        let response = client
            .invoke(&Invoker::method("s3", "list_buckets"), &Value::Null, None)
            .await
            .unwrap();
        let buckets = response.body.get("buckets").unwrap();
        assert_eq!(buckets, &Value::List(vec![Value::Map(
            [("name".to_string(), Value::String("a".to_string()))].into(),
        )]));

        let response = client
            .invoke(&Invoker::root("whoami"), &Value::Null, None)
            .await
            .unwrap();
        assert_eq!(response.body.get("account"), Some(&Value::String("42".to_string())));
    }

    #[tokio::test]
    async fn paged_fixtures_chain_in_index_order() {
        let tmp = TempDir::new().unwrap();
        write_fixture(
            tmp.path(),
            "ec2/describe_instances.page-1.json",
            r#"{"instances": [{"id": "i-1"}]}"#,
        );
        write_fixture(
            tmp.path(),
            "ec2/describe_instances.page-2.json",
            r#"{"instances": [{"id": "i-2"}]}"#,
        );

        let client = SnapshotClient::open(ProviderKind::Aws, tmp.path()).unwrap();
        let invoker = Invoker::method("ec2", "describe_instances");

        let first = client.invoke(&invoker, &Value::Null, None).await.unwrap();
        let token = first.next_token.clone().expect("second page token");

        let second = client
            .invoke(&invoker, &Value::Null, Some(&token))
            .await
            .unwrap();
        assert!(second.next_token.is_none());

        let first_id = |response: &ApiResponse| {
            response
                .body
                .get("instances")
                .and_then(|l| l.index(0))
                .and_then(|m| m.get("id"))
                .cloned()
        };
        assert_eq!(first_id(&first), Some(Value::from("i-1")));
        assert_eq!(first_id(&second), Some(Value::from("i-2")));
    }

    #[tokio::test]
    async fn error_fixture_surfaces_recorded_failure() {
        let tmp = TempDir::new().unwrap();
        write_fixture(
            tmp.path(),
            "s3/get_bucket_policy.error.json",
            r#"{"error": "AccessDenied: not authorized"}"#,
        );

        let client = SnapshotClient::open(ProviderKind::Aws, tmp.path()).unwrap();
        // The method still advertises itself so resolution reaches it.
        assert!(client.capabilities().has("s3", "get_bucket_policy"));

        let err = client
            .invoke(&Invoker::method("s3", "get_bucket_policy"), &Value::Null, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("AccessDenied"));
    }

    #[tokio::test]
    async fn malformed_fixture_reports_the_file() {
        let tmp = TempDir::new().unwrap();
        write_fixture(tmp.path(), "s3/list_buckets.json", "not json at all");

        let client = SnapshotClient::open(ProviderKind::Aws, tmp.path()).unwrap();
        let err = client
            .invoke(&Invoker::method("s3", "list_buckets"), &Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::SnapshotDecode { .. }));
        assert!(err.to_string().contains("list_buckets.json"));
    }

    #[tokio::test]
    async fn factory_maps_service_and_region_to_directories() {
        let tmp = TempDir::new().unwrap();
        write_fixture(
            tmp.path(),
            "s3/global/s3/list_buckets.json",
            r#"{"buckets": []}"#,
        );
        write_fixture(
            tmp.path(),
            "ec2/us-east-1/ec2/describe_instances.json",
            r#"{"instances": []}"#,
        );

        let factory = SnapshotFactory::new(tmp.path(), ProviderKind::Aws);
        assert!(factory.new_client("s3", None).await.is_ok());
        assert!(factory.new_client("ec2", Some("us-east-1")).await.is_ok());

        let err = factory
            .new_client("ec2", Some("eu-west-1"))
            .await
            .err()
            .expect("missing region directory should fail");
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }
}
