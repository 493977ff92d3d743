//! Adapter resolution.
//!
//! Rule documents speak in abstract `(service, action)` pairs; client
//! handles expose concrete sub-client methods. [`resolve`] bridges the two
//! deterministically - same capability set, same answer - so a rule file
//! never needs to know which SDK surface is underneath.

mod tables;

use thiserror::Error;
use tracing::trace;

use crate::provider::{CapabilitySet, Invoker, ProviderKind};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no adapter method for action '{action}' on service '{service}' ({provider} client)")]
    NoMatch {
        provider: ProviderKind,
        service: String,
        action: String,
    },
}

/// Resolve `(service, action)` against what `capabilities` actually
/// exposes. Stages, in order:
///
/// 1. the provider's static table entry for the pair, or by convention the
///    sub-client named after the service with the action as method;
/// 2. for `list` on services marked enumerate-all, the provider's
///    enumerate-all verb on that same sub-client;
/// 3. the provider's well-known sub-clients in fixed priority order, first
///    the exact method, then (for `list`) the enumerate-all verb;
/// 4. the action as a method directly on the top-level handle.
///
/// The first stage that matches wins; no capability means [`ResolveError`].
pub fn resolve(
    provider: ProviderKind,
    capabilities: &CapabilitySet,
    service: &str,
    action: &str,
) -> Result<Invoker, ResolveError> {
    let table = tables::for_provider(provider);
    let (sub_client, method) = table.lookup(service, action).unwrap_or((service, action));

    if capabilities.has(sub_client, method) {
        return Ok(found(sub_client, method));
    }

    if action == "list"
        && table.prefers_enumerate_all(service)
        && capabilities.has(sub_client, table.enumerate_all_verb)
    {
        return Ok(found(sub_client, table.enumerate_all_verb));
    }

    for fallback in table.fallback_sub_clients {
        if capabilities.has(fallback, method) {
            return Ok(found(fallback, method));
        }
        if action == "list" && capabilities.has(fallback, table.enumerate_all_verb) {
            return Ok(found(fallback, table.enumerate_all_verb));
        }
    }

    if capabilities.has_root(action) {
        trace!(service, action, "resolved to top-level method");
        return Ok(Invoker::root(action));
    }

    Err(ResolveError::NoMatch {
        provider,
        service: service.to_string(),
        action: action.to_string(),
    })
}

fn found(sub_client: &str, method: &str) -> Invoker {
    trace!(sub_client, method, "adapter resolved");
    Invoker::method(sub_client, method)
}
