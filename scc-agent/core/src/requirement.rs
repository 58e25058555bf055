use ahash::AHashSet;
use scc_agent_k8s_api as k8s;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One privilege signal extracted from a workload manifest.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Requirement {
    pub kind: RequirementKind,
    pub value: RequirementValue,
    pub origin: Origin,
}

/// The closed set of privilege signals an extractor may emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Privileged,
    RootUser,
    HostNetwork,
    HostPid,
    HostIpc,
    HostPath,
    Capabilities,
    Selinux,
    FsGroup,
    SupplementalGroups,
    Seccomp,
    Apparmor,
    Volumes,
    Ports,
    ResourceLimits,
}

/// How seriously a requirement widens the attack surface.
///
/// Severity is derived from the requirement kind alone; there is no way to
/// attach a different severity to a requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// The kind-specific payload carried by a requirement.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequirementValue {
    Flag(bool),
    Id(i64),
    Text(String),
    List(Vec<String>),
    Ids(Vec<i64>),
    Options(BTreeMap<String, String>),
}

/// Where in the manifest set a requirement was observed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Origin {
    pub resource_kind: String,
    pub resource_name: String,
    pub namespace: String,
    /// Sub-context within the resource, e.g. `container/app` or `volume/data`.
    pub context: String,
}

/// A service account referenced by the analyzed workloads, with the resources
/// that run as it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceAccountBinding {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Everything extracted from one analysis run: the requirements in traversal
/// order, the originating resource documents, and the derived service-account
/// and namespace sets. Built once per run and treated as immutable afterwards.
#[derive(Clone, Debug, Default)]
pub struct RequirementSet {
    pub source: String,
    pub documents: Vec<serde_json::Value>,
    pub requirements: Vec<Requirement>,
    pub service_accounts: Vec<ServiceAccountBinding>,
    pub namespaces: BTreeSet<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Serializable digest of a requirement set, for reports and oracle context.
#[derive(Clone, Debug, Serialize)]
pub struct RequirementSummary {
    pub total_resources: usize,
    pub total_requirements: usize,
    pub requirement_counts: BTreeMap<String, usize>,
    pub severity_counts: BTreeMap<String, usize>,
    pub namespaces: Vec<String>,
    pub service_accounts: Vec<ServiceAccountBinding>,
    pub errors: usize,
    pub warnings: usize,
}

// === impl Requirement ===

impl Requirement {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

// === impl RequirementKind ===

impl RequirementKind {
    /// The fixed kind-to-severity mapping.
    pub fn severity(self) -> Severity {
        match self {
            Self::Privileged | Self::HostNetwork | Self::HostPid | Self::HostIpc => {
                Severity::Critical
            }
            Self::RootUser | Self::HostPath | Self::Capabilities => Severity::High,
            Self::Selinux
            | Self::FsGroup
            | Self::SupplementalGroups
            | Self::Seccomp
            | Self::Apparmor
            | Self::Volumes
            | Self::Ports
            | Self::ResourceLimits => Severity::Medium,
        }
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Privileged => "privileged",
            Self::RootUser => "root_user",
            Self::HostNetwork => "host_network",
            Self::HostPid => "host_pid",
            Self::HostIpc => "host_ipc",
            Self::HostPath => "host_path",
            Self::Capabilities => "capabilities",
            Self::Selinux => "selinux",
            Self::FsGroup => "fs_group",
            Self::SupplementalGroups => "supplemental_groups",
            Self::Seccomp => "seccomp",
            Self::Apparmor => "apparmor",
            Self::Volumes => "volumes",
            Self::Ports => "ports",
            Self::ResourceLimits => "resource_limits",
        };
        s.fmt(f)
    }
}

// === impl Severity ===

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Medium => "medium".fmt(f),
            Self::High => "high".fmt(f),
            Self::Critical => "critical".fmt(f),
        }
    }
}

// === impl RequirementValue ===

impl RequirementValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Iterates the string items of a list payload; a lone text payload
    /// yields itself, everything else yields nothing.
    pub fn iter_strings(&self) -> impl Iterator<Item = &str> {
        let items: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Text(s) => vec![s.as_str()],
            _ => vec![],
        };
        items.into_iter()
    }
}

impl From<bool> for RequirementValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<i64> for RequirementValue {
    fn from(v: i64) -> Self {
        Self::Id(v)
    }
}

impl From<&str> for RequirementValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<String>> for RequirementValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

// === impl Origin ===

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({}) {}",
            self.resource_kind, self.resource_name, self.namespace, self.context
        )
    }
}

// === impl RequirementSet ===

impl RequirementSet {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Records a service-account reference, deduplicating on name × namespace
    /// and unioning the referencing-resource lists.
    pub fn bind_service_account(
        &mut self,
        name: impl Into<String>,
        namespace: impl Into<String>,
        resource: Option<String>,
    ) {
        let name = name.into();
        let namespace = namespace.into();
        let existing = self
            .service_accounts
            .iter_mut()
            .find(|sa| sa.name == name && sa.namespace == namespace);
        match existing {
            Some(sa) => {
                if let Some(resource) = resource {
                    if !sa.resources.contains(&resource) {
                        sa.resources.push(resource);
                    }
                }
            }
            None => self.service_accounts.push(ServiceAccountBinding {
                name,
                namespace,
                resources: resource.into_iter().collect(),
            }),
        }
    }

    /// Combines per-file sets into a single set for the whole analysis run.
    pub fn merge(sets: impl IntoIterator<Item = Self>) -> Self {
        let mut combined = Self::new("combined");
        for set in sets {
            combined.documents.extend(set.documents);
            combined.requirements.extend(set.requirements);
            combined.namespaces.extend(set.namespaces);
            combined.errors.extend(set.errors);
            combined.warnings.extend(set.warnings);
            for sa in set.service_accounts {
                let ServiceAccountBinding {
                    name,
                    namespace,
                    resources,
                } = sa;
                if resources.is_empty() {
                    combined.bind_service_account(name, namespace, None);
                } else {
                    for resource in resources {
                        combined.bind_service_account(
                            name.clone(),
                            namespace.clone(),
                            Some(resource),
                        );
                    }
                }
            }
        }
        combined
    }

    /// The distinct requirement kinds present in this set.
    pub fn kinds(&self) -> AHashSet<RequirementKind> {
        self.requirements.iter().map(|r| r.kind).collect()
    }

    pub fn has_kind(&self, kind: RequirementKind) -> bool {
        self.requirements.iter().any(|r| r.kind == kind)
    }

    /// An SCC embedded directly in the analyzed manifest set, if any.
    pub fn embedded_policy(&self) -> Option<k8s::SecurityContextConstraints> {
        let doc = self
            .documents
            .iter()
            .find(|doc| k8s::manifest::kind_of(doc) == k8s::scc::KIND)?;
        match serde_json::from_value(doc.clone()) {
            Ok(scc) => Some(scc),
            Err(error) => {
                tracing::warn!(%error, "ignoring undecodable embedded SCC");
                None
            }
        }
    }

    pub fn summary(&self) -> RequirementSummary {
        let mut requirement_counts = BTreeMap::new();
        let mut severity_counts = BTreeMap::new();
        for req in &self.requirements {
            *requirement_counts.entry(req.kind.to_string()).or_insert(0) += 1;
            *severity_counts
                .entry(req.severity().to_string())
                .or_insert(0) += 1;
        }
        RequirementSummary {
            total_resources: self.documents.len(),
            total_requirements: self.requirements.len(),
            requirement_counts,
            severity_counts,
            namespaces: self.namespaces.iter().cloned().collect(),
            service_accounts: self.service_accounts.clone(),
            errors: self.errors.len(),
            warnings: self.warnings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(kind: RequirementKind) -> Requirement {
        Requirement {
            kind,
            value: true.into(),
            origin: Origin {
                resource_kind: "Pod".to_string(),
                resource_name: "p".to_string(),
                namespace: "default".to_string(),
                context: "pod".to_string(),
            },
        }
    }

    #[test]
    fn severity_is_a_function_of_kind() {
        assert_eq!(RequirementKind::Privileged.severity(), Severity::Critical);
        assert_eq!(RequirementKind::HostNetwork.severity(), Severity::Critical);
        assert_eq!(RequirementKind::HostPid.severity(), Severity::Critical);
        assert_eq!(RequirementKind::HostIpc.severity(), Severity::Critical);
        assert_eq!(RequirementKind::RootUser.severity(), Severity::High);
        assert_eq!(RequirementKind::HostPath.severity(), Severity::High);
        assert_eq!(RequirementKind::Capabilities.severity(), Severity::High);
        assert_eq!(RequirementKind::FsGroup.severity(), Severity::Medium);
        assert_eq!(RequirementKind::Seccomp.severity(), Severity::Medium);
        assert_eq!(req(RequirementKind::HostPath).severity(), Severity::High);
    }

    #[test]
    fn service_accounts_dedupe_and_union_resources() {
        let mut set = RequirementSet::new("a.yaml");
        set.bind_service_account("runner", "prod", Some("Deployment/api".to_string()));
        set.bind_service_account("runner", "prod", Some("Deployment/api".to_string()));
        set.bind_service_account("runner", "prod", Some("Job/migrate".to_string()));
        set.bind_service_account("runner", "staging", None);

        assert_eq!(set.service_accounts.len(), 2);
        assert_eq!(
            set.service_accounts[0].resources,
            vec!["Deployment/api", "Job/migrate"]
        );
        assert!(set.service_accounts[1].resources.is_empty());
    }

    #[test]
    fn merge_combines_and_dedupes() {
        let mut a = RequirementSet::new("a.yaml");
        a.requirements.push(req(RequirementKind::Privileged));
        a.namespaces.insert("prod".to_string());
        a.bind_service_account("runner", "prod", Some("Pod/a".to_string()));

        let mut b = RequirementSet::new("b.yaml");
        b.requirements.push(req(RequirementKind::RootUser));
        b.namespaces.insert("prod".to_string());
        b.bind_service_account("runner", "prod", Some("Pod/b".to_string()));
        b.warnings.push("unsupported resource kind: List".to_string());

        let merged = RequirementSet::merge(vec![a, b]);
        assert_eq!(merged.requirements.len(), 2);
        assert_eq!(merged.namespaces.len(), 1);
        assert_eq!(merged.service_accounts.len(), 1);
        assert_eq!(merged.service_accounts[0].resources, vec!["Pod/a", "Pod/b"]);
        assert_eq!(merged.warnings.len(), 1);
    }

    #[test]
    fn summary_counts_by_kind_and_severity() {
        let mut set = RequirementSet::new("a.yaml");
        set.requirements.push(req(RequirementKind::Privileged));
        set.requirements.push(req(RequirementKind::Privileged));
        set.requirements.push(req(RequirementKind::FsGroup));

        let summary = set.summary();
        assert_eq!(summary.total_requirements, 3);
        assert_eq!(summary.requirement_counts["privileged"], 2);
        assert_eq!(summary.severity_counts["critical"], 2);
        assert_eq!(summary.severity_counts["medium"], 1);
    }

    #[test]
    fn embedded_policy_is_found_by_kind() {
        let mut set = RequirementSet::new("a.yaml");
        set.documents.push(serde_json::json!({
            "kind": "Deployment",
            "metadata": {"name": "api"},
        }));
        assert!(set.embedded_policy().is_none());

        set.documents.push(serde_json::json!({
            "apiVersion": "security.openshift.io/v1",
            "kind": "SecurityContextConstraints",
            "metadata": {"name": "app-scc"},
            "runAsUser": {"type": "RunAsAny"},
        }));
        assert_eq!(set.embedded_policy().unwrap().name(), "app-scc");
    }
}
