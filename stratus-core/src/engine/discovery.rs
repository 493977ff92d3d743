//! Discovery execution.
//!
//! Walks a catalog's (topologically ordered) steps, resolves and executes
//! their API calls, and materializes emitted items into the [`Inventory`].
//! A step is PENDING until reached, RUNNING while its calls execute, and
//! ends DONE or ERROR; a step whose parent errored is marked ERROR without
//! issuing a single call.
//!
//! Within a step, each call's response merges into a shared context that
//! later calls and the `emit` block resolve against: map bodies merge at
//! the top level, bare-list bodies land under the key `items`. Pages of a
//! paginated call merge by appending top-level lists and keeping the first
//! page's value for everything else.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::{debug, instrument, warn};

use super::catalog::{ApiCall, DiscoveryStep, ErrorPolicy, PARENT_FIELD};
use super::inventory::{Inventory, Item, StepStatus};
use super::value::Value;
use crate::adapter;
use crate::provider::{CloudClient, Invoker, ProviderError, ProviderKind};

pub struct DiscoveryExecutor<'a> {
    client: &'a dyn CloudClient,
    provider: ProviderKind,
    service: &'a str,
    region: Option<&'a str>,
    max_pages: u32,
}

enum CallFailure {
    Api(ProviderError),
    PageCap(Invoker),
}

impl<'a> DiscoveryExecutor<'a> {
    pub fn new(
        client: &'a dyn CloudClient,
        provider: ProviderKind,
        service: &'a str,
        region: Option<&'a str>,
        max_pages: u32,
    ) -> Self {
        Self {
            client,
            provider,
            service,
            region,
            max_pages,
        }
    }

    /// Run every step front to back. Failures never escape as errors; they
    /// land in the inventory as step statuses for the check runner to
    /// classify.
    #[instrument(name = "discovery", skip_all, fields(service = self.service, steps = steps.len()))]
    pub async fn execute(&self, steps: &[DiscoveryStep], inventory: &mut Inventory) {
        for step in steps {
            inventory.register(&step.discovery_id);
        }
        for step in steps {
            self.execute_step(step, inventory).await;
        }
        debug!(items = inventory.total_items(), "discovery complete");
    }

    async fn execute_step(&self, step: &DiscoveryStep, inventory: &mut Inventory) {
        let id = &step.discovery_id;
        inventory.mark_running(id);

        match &step.for_each {
            None => match self.run_instance(step, None).await {
                Ok(items) => {
                    debug!(step = %id, items = items.len(), "step done");
                    inventory.extend(id, items);
                    inventory.mark_done(id);
                }
                Err(reason) => {
                    warn!(step = %id, %reason, "step failed");
                    inventory.mark_error(id, reason);
                }
            },
            Some(parent_id) => {
                match inventory.status(parent_id) {
                    StepStatus::Done => {}
                    StepStatus::Error(parent_reason) => {
                        let reason = format!("parent step '{parent_id}' failed: {parent_reason}");
                        warn!(step = %id, %reason, "step skipped");
                        inventory.mark_error(id, reason);
                        return;
                    }
                    StepStatus::Pending | StepStatus::Running => {
                        // Unreachable for a topologically ordered catalog.
                        inventory.mark_error(
                            id,
                            format!("parent step '{parent_id}' has not completed"),
                        );
                        return;
                    }
                }
                let parents: Vec<Item> = inventory.items(parent_id).to_vec();
                let mut collected = Vec::new();
                for parent in &parents {
                    match self.run_instance(step, Some(parent)).await {
                        Ok(items) => collected.extend(items),
                        Err(reason) => {
                            warn!(step = %id, %reason, "step failed");
                            inventory.mark_error(id, reason);
                            return;
                        }
                    }
                }
                debug!(step = %id, items = collected.len(), parents = parents.len(), "step done");
                inventory.extend(id, collected);
                inventory.mark_done(id);
            }
        }
    }

    /// One pass over a step's call list, for one optional parent item.
    /// Returns the emitted items or the reason the step must fail.
    async fn run_instance(
        &self,
        step: &DiscoveryStep,
        parent: Option<&Item>,
    ) -> Result<Vec<Item>, String> {
        let mut context: BTreeMap<String, Value> = BTreeMap::new();
        context.insert("service".to_string(), Value::from(self.service));
        if let Some(region) = self.region {
            context.insert("region".to_string(), Value::from(region));
        }
        if let Some(parent) = parent {
            context.insert(PARENT_FIELD.to_string(), Value::Map(parent.clone()));
        }

        for call in &step.calls {
            let params = call.params.resolve(&Value::Map(context.clone()));
            // A pair the client cannot serve is a rule/capability mismatch,
            // fatal no matter what on_error says.
            let invoker = adapter::resolve(
                self.provider,
                self.client.capabilities(),
                &call.service,
                &call.action,
            )
            .map_err(|e| format!("adapter resolution failed: {e}"))?;

            match self.invoke_paginated(call, &invoker, &params).await {
                Ok(body) => merge_response(&mut context, body),
                Err(CallFailure::Api(e)) => match call.on_error {
                    ErrorPolicy::Continue => {
                        warn!(call = %invoker, error = %e, "call failed, continuing");
                    }
                    ErrorPolicy::Fail => return Err(e.to_string()),
                },
                Err(CallFailure::PageCap(invoker)) => {
                    return Err(format!(
                        "pagination exceeded {} pages for {invoker}",
                        self.max_pages
                    ));
                }
            }
        }

        let context = Value::Map(context);
        let collection = step.emit.items_for.resolve(&context);
        let elements = match collection {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            other => {
                return Err(format!(
                    "emit.items_for '{}' resolved to {}, expected a list",
                    step.emit.items_for.raw(),
                    other.type_name()
                ))
            }
        };

        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            let mut emit_context = match &context {
                Value::Map(map) => map.clone(),
                _ => BTreeMap::new(),
            };
            emit_context.insert("item".to_string(), element);
            let emit_context = Value::Map(emit_context);

            let mut item: Item = BTreeMap::new();
            for (field, template) in &step.emit.item {
                item.insert(field.clone(), template.resolve(&emit_context));
            }
            if let Some(parent) = parent {
                item.insert(PARENT_FIELD.to_string(), Value::Map(parent.clone()));
            }
            out.push(item);
        }
        Ok(out)
    }

    async fn invoke_paginated(
        &self,
        call: &ApiCall,
        invoker: &Invoker,
        params: &Value,
    ) -> Result<Value, CallFailure> {
        let mut merged = Value::Null;
        let mut token: Option<String> = None;
        let mut pages = 0u32;
        loop {
            let response = self
                .client
                .invoke(invoker, params, token.as_deref())
                .await
                .map_err(CallFailure::Api)?;
            pages += 1;
            merged = merge_pages(merged, response.body);
            match response.next_token {
                Some(next) if call.paginate => {
                    if pages >= self.max_pages {
                        return Err(CallFailure::PageCap(invoker.clone()));
                    }
                    token = Some(next);
                }
                _ => break,
            }
        }
        if pages > 1 {
            debug!(call = %invoker, pages, "pages merged");
        }
        Ok(merged)
    }
}

fn merge_response(context: &mut BTreeMap<String, Value>, body: Value) {
    match body {
        Value::Map(map) => {
            // Later calls override earlier keys.
            for (key, value) in map {
                context.insert(key, value);
            }
        }
        Value::List(items) => {
            context.insert("items".to_string(), Value::List(items));
        }
        Value::Null => {}
        other => {
            context.insert("result".to_string(), other);
        }
    }
}

fn merge_pages(acc: Value, page: Value) -> Value {
    match (acc, page) {
        (Value::Null, page) => page,
        (Value::List(mut acc), Value::List(more)) => {
            acc.extend(more);
            Value::List(acc)
        }
        (Value::Map(mut acc), Value::Map(more)) => {
            for (key, value) in more {
                match acc.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                    Entry::Occupied(mut slot) => {
                        if let (Value::List(dst), Value::List(src)) = (slot.get_mut(), value) {
                            dst.extend(src);
                        }
                        // Non-list values keep the first page's copy.
                    }
                }
            }
            Value::Map(acc)
        }
        // Shape changed between pages; trust the first page.
        (acc, _) => acc,
    }
}
