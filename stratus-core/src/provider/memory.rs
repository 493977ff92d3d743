//! In-memory provider.
//!
//! Serves scripted responses for tests: canned bodies, multi-page
//! sequences, unbounded token chains, failures, slow responses, and
//! panics. Every invocation is recorded so tests can assert on exactly
//! which calls were (or were not) issued.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    ApiResponse, CapabilitySet, ClientFactory, CloudClient, Invoker, ProviderError, ProviderKind,
};
use crate::engine::value::Value;

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub sub_client: Option<String>,
    pub method: String,
    pub params: Value,
    pub page_token: Option<String>,
}

#[derive(Clone)]
enum Scripted {
    Single(Value),
    Pages(Vec<Value>),
    /// Always hands back another continuation token; exercises the
    /// pagination ceiling.
    Endless(Value),
    Fail(String),
    Slow { delay: Duration, body: Value },
    Panic(String),
}

pub struct MemoryClient {
    provider: ProviderKind,
    capabilities: CapabilitySet,
    scripted: BTreeMap<(String, String), Scripted>,
    calls: Mutex<Vec<CallRecord>>,
}

impl MemoryClient {
    pub fn builder(provider: ProviderKind) -> MemoryClientBuilder {
        MemoryClientBuilder {
            provider,
            scripted: BTreeMap::new(),
        }
    }

    pub fn call_log(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct MemoryClientBuilder {
    provider: ProviderKind,
    scripted: BTreeMap<(String, String), Scripted>,
}

impl MemoryClientBuilder {
    fn script(mut self, sub_client: &str, method: &str, scripted: Scripted) -> Self {
        self.scripted
            .insert((sub_client.to_string(), method.to_string()), scripted);
        self
    }

    /// Canned single-page response for `sub_client.method`.
    pub fn response(self, sub_client: &str, method: &str, body: impl Into<Value>) -> Self {
        self.script(sub_client, method, Scripted::Single(body.into()))
    }

    /// Multi-page response; each page after the first requires the token
    /// handed out with its predecessor.
    pub fn pages(self, sub_client: &str, method: &str, pages: Vec<impl Into<Value>>) -> Self {
        self.script(
            sub_client,
            method,
            Scripted::Pages(pages.into_iter().map(Into::into).collect()),
        )
    }

    /// A pager that never runs out of tokens.
    pub fn endless_pages(self, sub_client: &str, method: &str, body: impl Into<Value>) -> Self {
        self.script(sub_client, method, Scripted::Endless(body.into()))
    }

    /// Every invocation fails with `message`.
    pub fn failure(self, sub_client: &str, method: &str, message: &str) -> Self {
        self.script(sub_client, method, Scripted::Fail(message.to_string()))
    }

    /// Responds after `delay`; combine with a scan deadline to force a
    /// timeout mid-unit.
    pub fn slow_response(
        self,
        sub_client: &str,
        method: &str,
        delay: Duration,
        body: impl Into<Value>,
    ) -> Self {
        self.script(
            sub_client,
            method,
            Scripted::Slow {
                delay,
                body: body.into(),
            },
        )
    }

    /// Panics on invocation; exercises unit isolation in the orchestrator.
    pub fn panics(self, sub_client: &str, method: &str, message: &str) -> Self {
        self.script(sub_client, method, Scripted::Panic(message.to_string()))
    }

    /// Canned response on the top-level handle rather than a sub-client.
    /// Root methods are keyed under the empty sub-client name.
    pub fn root_response(self, method: &str, body: impl Into<Value>) -> Self {
        self.script("", method, Scripted::Single(body.into()))
    }

    pub fn build(self) -> MemoryClient {
        let mut capabilities = CapabilitySet::new();
        for (sub_client, method) in self.scripted.keys() {
            if sub_client.is_empty() {
                capabilities.add_root(method);
            } else {
                capabilities.add(sub_client, method);
            }
        }
        MemoryClient {
            provider: self.provider,
            capabilities,
            scripted: self.scripted,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CloudClient for MemoryClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn invoke(
        &self,
        invoker: &Invoker,
        params: &Value,
        page_token: Option<&str>,
    ) -> Result<ApiResponse, ProviderError> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(CallRecord {
            sub_client: invoker.sub_client.clone(),
            method: invoker.method.clone(),
            params: params.clone(),
            page_token: page_token.map(str::to_string),
        });

        let key = (
            invoker.sub_client.clone().unwrap_or_default(),
            invoker.method.clone(),
        );
        let scripted = self
            .scripted
            .get(&key)
            .ok_or_else(|| ProviderError::MissingResponse(invoker.to_string()))?;

        let page_index = page_token
            .and_then(|token| token.parse::<usize>().ok())
            .unwrap_or(0);

        match scripted {
            Scripted::Single(body) => Ok(ApiResponse::new(body.clone())),
            Scripted::Pages(pages) => {
                let body = pages
                    .get(page_index)
                    .cloned()
                    .ok_or_else(|| ProviderError::MissingResponse(invoker.to_string()))?;
                let next_token = (page_index + 1 < pages.len())
                    .then(|| (page_index + 1).to_string());
                Ok(ApiResponse::page(body, next_token))
            }
            Scripted::Endless(body) => Ok(ApiResponse::page(
                body.clone(),
                Some((page_index + 1).to_string()),
            )),
            Scripted::Fail(message) => Err(ProviderError::call(invoker, message.clone())),
            Scripted::Slow { delay, body } => {
                tokio::time::sleep(*delay).await;
                Ok(ApiResponse::new(body.clone()))
            }
            Scripted::Panic(message) => panic!("{message}"),
        }
    }
}

/// Hands out pre-built [`MemoryClient`]s by service. Clients are shared,
/// so a test keeps its own `Arc` and inspects the call log after the scan.
pub struct MemoryFactory {
    provider: ProviderKind,
    clients: BTreeMap<String, Arc<MemoryClient>>,
}

impl MemoryFactory {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            clients: BTreeMap::new(),
        }
    }

    pub fn with_client(mut self, service: &str, client: MemoryClient) -> Self {
        self.clients.insert(service.to_string(), Arc::new(client));
        self
    }

    /// The registered client for `service`, for post-scan assertions.
    pub fn client(&self, service: &str) -> Option<Arc<MemoryClient>> {
        self.clients.get(service).cloned()
    }
}

#[async_trait]
impl ClientFactory for MemoryFactory {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn new_client(
        &self,
        service: &str,
        _region: Option<&str>,
    ) -> Result<Arc<dyn CloudClient>, ProviderError> {
        match self.clients.get(service) {
            Some(client) => Ok(client.clone() as Arc<dyn CloudClient>),
            None => Err(ProviderError::Unsupported(format!(
                "no client registered for service '{service}'"
            ))),
        }
    }
}
