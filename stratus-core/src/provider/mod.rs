//! Provider SDK boundary.
//!
//! The engine never talks to a cloud SDK directly. It resolves an abstract
//! `(service, action)` pair into an [`Invoker`] against a client's
//! [`CapabilitySet`], then executes it through the [`CloudClient`] trait.
//! Two implementations ship with the crate: [`snapshot`] serves recorded
//! API responses from a directory tree, [`memory`] serves scripted
//! responses for tests.

pub mod memory;
pub mod snapshot;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::value::Value;

pub use memory::{MemoryClient, MemoryClientBuilder, MemoryFactory};
pub use snapshot::{SnapshotClient, SnapshotFactory};

/// The cloud platforms a rule document can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Azure,
    Gcp,
    Oci,
    Ibm,
    Alibaba,
    Kubernetes,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::Aws,
        ProviderKind::Azure,
        ProviderKind::Gcp,
        ProviderKind::Oci,
        ProviderKind::Ibm,
        ProviderKind::Alibaba,
        ProviderKind::Kubernetes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Azure => "azure",
            ProviderKind::Gcp => "gcp",
            ProviderKind::Oci => "oci",
            ProviderKind::Ibm => "ibm",
            ProviderKind::Alibaba => "alibaba",
            ProviderKind::Kubernetes => "kubernetes",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "AWS",
            ProviderKind::Azure => "Azure",
            ProviderKind::Gcp => "Google Cloud",
            ProviderKind::Oci => "Oracle Cloud",
            ProviderKind::Ibm => "IBM Cloud",
            ProviderKind::Alibaba => "Alibaba Cloud",
            ProviderKind::Kubernetes => "Kubernetes",
        }
    }

    /// Response field that uniquely identifies a resource on this platform.
    /// Falls back to `id`/`name` when absent, see
    /// [`resource_identity`](crate::engine::outcome::resource_identity).
    pub fn unique_id_field(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "arn",
            ProviderKind::Azure => "id",
            ProviderKind::Gcp => "self_link",
            ProviderKind::Oci => "id",
            ProviderKind::Ibm => "crn",
            ProviderKind::Alibaba => "id",
            ProviderKind::Kubernetes => "uid",
        }
    }

    /// Whether `service` is scoped to the account rather than a region.
    /// Global services produce exactly one scan unit no matter how many
    /// regions were requested.
    pub fn is_global_service(&self, service: &str) -> bool {
        match self {
            ProviderKind::Aws => {
                matches!(
                    service,
                    "iam" | "s3" | "cloudfront" | "route53" | "organizations"
                )
            }
            ProviderKind::Azure => matches!(service, "subscription" | "authorization" | "policy"),
            ProviderKind::Gcp => matches!(service, "iam" | "resourcemanager" | "dns"),
            ProviderKind::Oci => matches!(service, "identity" | "audit"),
            ProviderKind::Ibm => matches!(service, "iam" | "resource"),
            ProviderKind::Alibaba => matches!(service, "ram" | "resourcemanager"),
            // Clusters have no region axis at all.
            ProviderKind::Kubernetes => true,
        }
    }

    /// Region used when a scan names none.
    pub fn default_region(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "us-east-1",
            ProviderKind::Azure => "eastus",
            ProviderKind::Gcp => "us-central1",
            ProviderKind::Oci => "us-ashburn-1",
            ProviderKind::Ibm => "us-south",
            ProviderKind::Alibaba => "cn-hangzhou",
            ProviderKind::Kubernetes => "cluster",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" | "amazon" => Ok(ProviderKind::Aws),
            "azure" | "microsoft" => Ok(ProviderKind::Azure),
            "gcp" | "google" => Ok(ProviderKind::Gcp),
            "oci" | "oracle" => Ok(ProviderKind::Oci),
            "ibm" | "ibm_cloud" => Ok(ProviderKind::Ibm),
            "alibaba" | "alibabacloud" | "alicloud" => Ok(ProviderKind::Alibaba),
            "kubernetes" | "k8s" => Ok(ProviderKind::Kubernetes),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// A resolved target for one API call: a method on a named sub-client, or a
/// method directly on the top-level client handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invoker {
    pub sub_client: Option<String>,
    pub method: String,
}

impl Invoker {
    pub fn method(sub_client: &str, method: &str) -> Self {
        Self {
            sub_client: Some(sub_client.to_string()),
            method: method.to_string(),
        }
    }

    pub fn root(method: &str) -> Self {
        Self {
            sub_client: None,
            method: method.to_string(),
        }
    }
}

impl fmt::Display for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_client {
            Some(sub) => write!(f, "{sub}.{}", self.method),
            None => write!(f, "{}", self.method),
        }
    }
}

/// The methods a client handle actually exposes, keyed by sub-client.
/// Adapter resolution only ever returns invokers present in this set.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    methods: BTreeMap<String, BTreeSet<String>>,
    root_methods: BTreeSet<String>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sub_client: &str, method: &str) {
        self.methods
            .entry(sub_client.to_string())
            .or_default()
            .insert(method.to_string());
    }

    pub fn add_root(&mut self, method: &str) {
        self.root_methods.insert(method.to_string());
    }

    pub fn has(&self, sub_client: &str, method: &str) -> bool {
        self.methods
            .get(sub_client)
            .is_some_and(|methods| methods.contains(method))
    }

    pub fn has_root(&self, method: &str) -> bool {
        self.root_methods.contains(method)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.root_methods.is_empty()
    }

    pub fn sub_clients(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// One page of an API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub body: Value,
    /// Continuation token for the next page, `None` on the last page.
    pub next_token: Option<String>,
}

impl ApiResponse {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            next_token: None,
        }
    }

    pub fn page(body: Value, next_token: Option<String>) -> Self {
        Self { body, next_token }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("call {invoker} failed: {message}")]
    Call { invoker: String, message: String },

    #[error("no recorded response for {0}")]
    MissingResponse(String),

    #[error("failed to read snapshot {}: {source}", path.display())]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot {}: {source}", path.display())]
    SnapshotDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn call(invoker: &Invoker, message: impl Into<String>) -> Self {
        ProviderError::Call {
            invoker: invoker.to_string(),
            message: message.into(),
        }
    }
}

/// A ready-to-use client handle for one `(service, region)` pair.
#[async_trait]
pub trait CloudClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn capabilities(&self) -> &CapabilitySet;

    /// Execute a resolved invoker. `page_token` carries the continuation
    /// token from the previous page, `None` on the first call.
    async fn invoke(
        &self,
        invoker: &Invoker,
        params: &Value,
        page_token: Option<&str>,
    ) -> Result<ApiResponse, ProviderError>;
}

/// Builds [`CloudClient`] handles for one provider.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn new_client(
        &self,
        service: &str,
        region: Option<&str>,
    ) -> Result<Arc<dyn CloudClient>, ProviderError>;
}

/// Client factories keyed by provider, consulted by the scan orchestrator.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    factories: BTreeMap<ProviderKind, Arc<dyn ClientFactory>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ClientFactory>) {
        self.factories.insert(factory.provider(), factory);
    }

    pub fn with(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn get(&self, provider: ProviderKind) -> Option<Arc<dyn ClientFactory>> {
        self.factories.get(&provider).cloned()
    }
}
