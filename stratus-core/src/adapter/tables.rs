//! Static per-provider action tables.
//!
//! Each table maps the abstract `(service, action)` pairs used by rule
//! documents onto the sub-client/method names of that provider's SDK
//! surface. Pairs not listed here resolve by convention: the sub-client is
//! the service name and the method is the action name.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::provider::ProviderKind;

pub(crate) struct ActionTable {
    mappings: HashMap<(&'static str, &'static str), (&'static str, &'static str)>,
    /// Services whose bare `list` falls back to the enumerate-all verb.
    enumerate_all: &'static [&'static str],
    /// Provider-wide enumerate-all verb (`list_all`, `aggregated_list`, ...).
    pub(crate) enumerate_all_verb: &'static str,
    /// Sub-clients probed, in order, when neither the table nor the
    /// conventional sub-client matches.
    pub(crate) fallback_sub_clients: &'static [&'static str],
}

impl ActionTable {
    fn new(
        entries: &[((&'static str, &'static str), (&'static str, &'static str))],
        enumerate_all: &'static [&'static str],
        enumerate_all_verb: &'static str,
        fallback_sub_clients: &'static [&'static str],
    ) -> Self {
        Self {
            mappings: entries.iter().copied().collect(),
            enumerate_all,
            enumerate_all_verb,
            fallback_sub_clients,
        }
    }

    pub(crate) fn lookup(&self, service: &str, action: &str) -> Option<(&'static str, &'static str)> {
        self.mappings.get(&(service, action)).copied()
    }

    pub(crate) fn prefers_enumerate_all(&self, service: &str) -> bool {
        self.enumerate_all.contains(&service)
    }
}

static AWS: Lazy<ActionTable> = Lazy::new(|| {
    ActionTable::new(
        &[
            (("s3", "list"), ("s3", "list_buckets")),
            (("ec2", "list"), ("ec2", "describe_instances")),
            (("ec2", "list_security_groups"), ("ec2", "describe_security_groups")),
            (("vpc", "list"), ("ec2", "describe_vpcs")),
            (("ebs", "list"), ("ec2", "describe_volumes")),
            (("iam", "list"), ("iam", "list_users")),
            (("rds", "list"), ("rds", "describe_db_instances")),
            (("kms", "list"), ("kms", "list_keys")),
            (("cloudtrail", "list"), ("cloudtrail", "describe_trails")),
            (("lambda", "list"), ("lambda", "list_functions")),
            (("elb", "list"), ("elbv2", "describe_load_balancers")),
        ],
        &[],
        "list_all",
        &["ec2", "iam", "s3"],
    )
});

static AZURE: Lazy<ActionTable> = Lazy::new(|| {
    ActionTable::new(
        &[
            (("storage", "list"), ("storage_accounts", "list")),
            (("keyvault", "list"), ("vaults", "list_by_subscription")),
            (("sql", "list"), ("servers", "list")),
            (("web", "list"), ("web_apps", "list")),
            (("monitor", "list"), ("activity_logs", "list")),
        ],
        // network and compute inventories are subscription-wide.
        &["network", "compute"],
        "list_all",
        &["resources", "resource_groups"],
    )
});

static GCP: Lazy<ActionTable> = Lazy::new(|| {
    ActionTable::new(
        &[
            (("storage", "list"), ("buckets", "list")),
            (("compute", "list"), ("instances", "aggregated_list")),
            (("compute", "list_disks"), ("disks", "aggregated_list")),
            (("iam", "list"), ("service_accounts", "list")),
            (("container", "list"), ("clusters", "list")),
            (("sql", "list"), ("instances", "list")),
        ],
        &["compute"],
        "aggregated_list",
        &["projects", "instances"],
    )
});

static OCI: Lazy<ActionTable> = Lazy::new(|| {
    ActionTable::new(
        &[
            (("compute", "list"), ("compute", "list_instances")),
            (("object_storage", "list"), ("object_storage", "list_buckets")),
            (("identity", "list"), ("identity", "list_users")),
            (("network", "list"), ("virtual_network", "list_vcns")),
            (("database", "list"), ("database", "list_db_systems")),
        ],
        &[],
        "list_all",
        &["identity"],
    )
});

static IBM: Lazy<ActionTable> = Lazy::new(|| {
    ActionTable::new(
        &[
            (("resource", "list"), ("resource_controller", "list_resource_instances")),
            (("iam", "list"), ("iam_identity", "list_api_keys")),
            (("cos", "list"), ("cos", "list_buckets")),
            (("vpc", "list"), ("vpc", "list_instances")),
        ],
        &[],
        "list_all",
        &["resource_controller"],
    )
});

static ALIBABA: Lazy<ActionTable> = Lazy::new(|| {
    ActionTable::new(
        &[
            (("ecs", "list"), ("ecs", "describe_instances")),
            (("oss", "list"), ("oss", "list_buckets")),
            (("ram", "list"), ("ram", "list_users")),
            (("vpc", "list"), ("vpc", "describe_vpcs")),
            (("rds", "list"), ("rds", "describe_db_instances")),
        ],
        &[],
        "list_all",
        &["ecs"],
    )
});

static KUBERNETES: Lazy<ActionTable> = Lazy::new(|| {
    ActionTable::new(
        &[
            (("pods", "list"), ("core_v1", "list_pod_for_all_namespaces")),
            (("services", "list"), ("core_v1", "list_service_for_all_namespaces")),
            (("nodes", "list"), ("core_v1", "list_node")),
            (("namespaces", "list"), ("core_v1", "list_namespace")),
            (("secrets", "list"), ("core_v1", "list_secret_for_all_namespaces")),
            (("deployments", "list"), ("apps_v1", "list_deployment_for_all_namespaces")),
            (("daemonsets", "list"), ("apps_v1", "list_daemon_set_for_all_namespaces")),
            (("jobs", "list"), ("batch_v1", "list_job_for_all_namespaces")),
            (("network_policies", "list"), ("networking_v1", "list_network_policy_for_all_namespaces")),
            (("roles", "list"), ("rbac_authorization_v1", "list_role_for_all_namespaces")),
        ],
        &[],
        "list_all",
        &[
            "core_v1",
            "apps_v1",
            "batch_v1",
            "networking_v1",
            "rbac_authorization_v1",
        ],
    )
});

pub(crate) fn for_provider(provider: ProviderKind) -> &'static ActionTable {
    match provider {
        ProviderKind::Aws => &AWS,
        ProviderKind::Azure => &AZURE,
        ProviderKind::Gcp => &GCP,
        ProviderKind::Oci => &OCI,
        ProviderKind::Ibm => &IBM,
        ProviderKind::Alibaba => &ALIBABA,
        ProviderKind::Kubernetes => &KUBERNETES,
    }
}
