use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const API_VERSION: &str = "security.openshift.io/v1";
pub const KIND: &str = "SecurityContextConstraints";

/// Annotation keys stamped onto generated objects.
pub mod annotations {
    pub const DESCRIPTION: &str = "kubernetes.io/description";
    pub const GENERATED_BY: &str = "generated-by";
    pub const GENERATED_AT: &str = "generated-at";
    pub const UPDATED_BY: &str = "last-updated-by";
    pub const UPDATED_AT: &str = "last-updated-at";
}

/// The `security.openshift.io/v1` SecurityContextConstraints wire object.
///
/// SCCs are cluster-scoped and, unlike most resources, carry their
/// configuration at the top level rather than under a `spec`. Empty list
/// fields and unset optionals are omitted when serialized.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContextConstraints {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    #[serde(default)]
    pub allow_privileged_container: bool,

    #[serde(default)]
    pub allow_host_network: bool,

    #[serde(default, rename = "allowHostPID")]
    pub allow_host_pid: bool,

    #[serde(default, rename = "allowHostIPC")]
    pub allow_host_ipc: bool,

    #[serde(default)]
    pub allow_host_ports: bool,

    #[serde(default)]
    pub allow_host_dir_volume_plugin: bool,

    #[serde(default)]
    pub read_only_root_filesystem: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<StrategyOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<StrategyOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub se_linux_context: Option<StrategyOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<StrategyOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplemental_groups: Option<StrategyOptions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_drop_capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_add_capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_unsafe_sysctls: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_sysctls: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_flex_volumes: Option<Vec<AllowedFlexVolume>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_host_paths: Option<Vec<AllowedHostPath>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profiles: Option<Vec<String>>,
}

/// One of the typed strategy sub-objects (`runAsUser`, `fsGroup`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StrategyOptions {
    #[serde(rename = "type")]
    pub strategy: StrategyKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum StrategyKind {
    RunAsAny,
    MustRunAs,
    MustRunAsNonRoot,
    MustRunAsRange,
}

/// A host-path prefix granted by an SCC.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedHostPath {
    pub path_prefix: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AllowedFlexVolume {
    pub driver: String,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

// === impl SecurityContextConstraints ===

impl SecurityContextConstraints {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|anns| anns.get(key))
            .map(String::as_str)
    }
}

impl Default for SecurityContextConstraints {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            priority: None,
            allow_privileged_container: false,
            allow_host_network: false,
            allow_host_pid: false,
            allow_host_ipc: false,
            allow_host_ports: false,
            allow_host_dir_volume_plugin: false,
            read_only_root_filesystem: false,
            run_as_user: None,
            run_as_group: None,
            se_linux_context: None,
            fs_group: None,
            supplemental_groups: None,
            allowed_capabilities: vec![],
            required_drop_capabilities: vec![],
            default_add_capabilities: vec![],
            allowed_unsafe_sysctls: vec![],
            forbidden_sysctls: vec![],
            volumes: vec![],
            users: vec![],
            groups: vec![],
            allowed_flex_volumes: None,
            allowed_host_paths: None,
            seccomp_profiles: None,
        }
    }
}

// === impl StrategyKind ===

impl StrategyKind {
    pub fn options(self) -> StrategyOptions {
        StrategyOptions { strategy: self }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunAsAny => "RunAsAny".fmt(f),
            Self::MustRunAs => "MustRunAs".fmt(f),
            Self::MustRunAsNonRoot => "MustRunAsNonRoot".fmt(f),
            Self::MustRunAsRange => "MustRunAsRange".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_are_omitted() {
        let scc = SecurityContextConstraints {
            priority: Some(10),
            run_as_user: Some(StrategyKind::MustRunAsNonRoot.options()),
            required_drop_capabilities: vec!["ALL".to_string()],
            ..SecurityContextConstraints::new("test")
        };

        let json = serde_json::to_value(&scc).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj["apiVersion"], "security.openshift.io/v1");
        assert_eq!(obj["kind"], "SecurityContextConstraints");
        assert_eq!(obj["runAsUser"]["type"], "MustRunAsNonRoot");
        assert_eq!(obj["requiredDropCapabilities"][0], "ALL");
        assert!(!obj.contains_key("allowedCapabilities"));
        assert!(!obj.contains_key("users"));
        assert!(!obj.contains_key("allowedHostPaths"));
    }

    #[test]
    fn host_flags_use_upstream_casing() {
        let scc = SecurityContextConstraints {
            allow_host_pid: true,
            allow_host_ipc: true,
            ..SecurityContextConstraints::new("host")
        };
        let json = serde_json::to_value(&scc).unwrap();
        assert_eq!(json["allowHostPID"], true);
        assert_eq!(json["allowHostIPC"], true);
    }

    #[test]
    fn decodes_cluster_object_with_missing_fields() {
        let scc: SecurityContextConstraints = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "anyuid", "resourceVersion": "41"},
            "runAsUser": {"type": "RunAsAny"},
            "volumes": ["configMap", "secret"],
        }))
        .unwrap();
        assert_eq!(scc.name(), "anyuid");
        assert_eq!(scc.metadata.resource_version.as_deref(), Some("41"));
        assert_eq!(
            scc.run_as_user,
            Some(StrategyKind::RunAsAny.options()),
        );
        assert!(scc.allowed_capabilities.is_empty());
        assert!(!scc.allow_privileged_container);
    }
}
