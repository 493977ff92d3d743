//! Engine tuning knobs and result filters.

use std::collections::BTreeSet;
use std::time::Duration;

/// Ceiling on pages fetched per paginated call. A provider that keeps
/// handing back continuation tokens past this bound fails the step instead
/// of looping forever.
pub const DEFAULT_MAX_PAGES: u32 = 32;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Scan units running at once.
    pub max_concurrency: usize,
    /// Per-call pagination ceiling.
    pub max_pages: u32,
    /// Overall scan budget; work still outstanding when it expires is
    /// reported as ERROR rather than silently dropped.
    pub deadline: Option<Duration>,
    /// Restrict execution to these rule ids.
    pub check_filter: Option<BTreeSet<String>>,
    /// Only report resources whose name contains this substring
    /// (case-insensitive).
    pub resource_filter: Option<String>,
    /// Restrict unit planning to these services.
    pub services: Option<BTreeSet<String>>,
    /// Regions to expand regional services over; empty means the
    /// provider's default region.
    pub regions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_pages: DEFAULT_MAX_PAGES,
            deadline: None,
            check_filter: None,
            resource_filter: None,
            services: None,
            regions: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn wants_check(&self, rule_id: &str) -> bool {
        match &self.check_filter {
            Some(ids) => ids.contains(rule_id),
            None => true,
        }
    }

    pub fn wants_resource(&self, resource_name: &str) -> bool {
        match &self.resource_filter {
            Some(needle) => resource_name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }

    pub fn wants_service(&self, service: &str) -> bool {
        match &self.services {
            Some(names) => names.contains(service),
            None => true,
        }
    }
}
