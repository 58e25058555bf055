use crate::AGENT_NAME;
use scc_agent_k8s_api::{
    scc::{annotations, AllowedFlexVolume},
    AllowedHostPath, ObjectMeta, SecurityContextConstraints, StrategyKind, Time,
};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_PRIORITY: i32 = 10;

/// Volume types every policy permits regardless of extracted requirements.
pub const BASE_VOLUME_TYPES: &[&str] = &[
    "configMap",
    "downwardAPI",
    "emptyDir",
    "persistentVolumeClaim",
    "projected",
    "secret",
];

/// The mutable policy model under synthesis.
///
/// Richer than the wire object: permission sets are real sets (so rule
/// application is idempotent by construction) and identifiers preserved from
/// an existing cluster object ride along so an update round-trips them
/// untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct SccConfig {
    pub name: String,
    pub description: String,
    pub priority: i32,

    pub allow_privileged_container: bool,
    pub allow_host_network: bool,
    pub allow_host_pid: bool,
    pub allow_host_ipc: bool,
    pub allow_host_ports: bool,
    pub allow_host_dir_volume_plugin: bool,
    pub read_only_root_filesystem: bool,

    pub run_as_user: StrategyKind,
    pub run_as_group: StrategyKind,
    pub se_linux_context: StrategyKind,
    pub fs_group: StrategyKind,
    pub supplemental_groups: StrategyKind,

    pub allowed_capabilities: BTreeSet<String>,
    pub required_drop_capabilities: BTreeSet<String>,
    pub default_add_capabilities: BTreeSet<String>,
    pub allowed_unsafe_sysctls: BTreeSet<String>,
    pub forbidden_sysctls: BTreeSet<String>,
    pub allowed_volume_types: BTreeSet<String>,
    pub allowed_host_paths: Vec<AllowedHostPath>,
    pub allowed_flex_volumes: Vec<AllowedFlexVolume>,
    pub seccomp_profiles: Vec<String>,

    pub users: Vec<String>,
    pub groups: Vec<String>,

    provenance: Provenance,
}

/// Identifiers and stamps preserved across a regeneration of an existing
/// cluster object.
#[derive(Clone, Debug, Default, PartialEq)]
struct Provenance {
    resource_version: Option<String>,
    uid: Option<String>,
    creation_timestamp: Option<Time>,
    generated_at: Option<String>,
    updated: bool,
}

// === impl SccConfig ===

impl SccConfig {
    /// The all-restrictive starting point for synthesis.
    pub fn restricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            priority: DEFAULT_PRIORITY,
            allow_privileged_container: false,
            allow_host_network: false,
            allow_host_pid: false,
            allow_host_ipc: false,
            allow_host_ports: false,
            allow_host_dir_volume_plugin: false,
            read_only_root_filesystem: false,
            run_as_user: StrategyKind::MustRunAsNonRoot,
            run_as_group: StrategyKind::MustRunAs,
            se_linux_context: StrategyKind::MustRunAs,
            fs_group: StrategyKind::MustRunAs,
            supplemental_groups: StrategyKind::MustRunAs,
            allowed_capabilities: BTreeSet::new(),
            required_drop_capabilities: ["ALL".to_string()].into_iter().collect(),
            default_add_capabilities: BTreeSet::new(),
            allowed_unsafe_sysctls: BTreeSet::new(),
            forbidden_sysctls: BTreeSet::new(),
            allowed_volume_types: BASE_VOLUME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_host_paths: Vec::new(),
            allowed_flex_volumes: Vec::new(),
            seccomp_profiles: vec!["runtime/default".to_string()],
            users: Vec::new(),
            groups: Vec::new(),
            provenance: Provenance::default(),
        }
    }

    /// Grants a capability, keeping the allow and drop sets disjoint.
    pub fn allow_capability(&mut self, cap: &str) {
        self.required_drop_capabilities.remove(cap);
        self.allowed_capabilities.insert(cap.to_string());
    }

    pub fn allow_volume_type(&mut self, volume_type: &str) {
        self.allowed_volume_types.insert(volume_type.to_string());
    }

    /// Grants a host-path prefix, deduplicated on prefix × read-only.
    pub fn allow_host_path(&mut self, path_prefix: &str, read_only: bool) {
        let rule = AllowedHostPath {
            path_prefix: path_prefix.to_string(),
            read_only,
        };
        if !self.allowed_host_paths.contains(&rule) {
            self.allowed_host_paths.push(rule);
        }
    }

    /// Rebuilds the model from an existing cluster object, defaulting absent
    /// fields to the synthesis defaults and capturing the identifiers that
    /// must survive an update.
    pub fn from_resource(existing: &SecurityContextConstraints) -> Self {
        let mut config = Self::restricted(existing.name());

        config.description = existing
            .annotation(annotations::DESCRIPTION)
            .unwrap_or_default()
            .to_string();
        if let Some(priority) = existing.priority {
            config.priority = priority;
        }

        config.allow_privileged_container = existing.allow_privileged_container;
        config.allow_host_network = existing.allow_host_network;
        config.allow_host_pid = existing.allow_host_pid;
        config.allow_host_ipc = existing.allow_host_ipc;
        config.allow_host_ports = existing.allow_host_ports;
        config.allow_host_dir_volume_plugin = existing.allow_host_dir_volume_plugin;
        config.read_only_root_filesystem = existing.read_only_root_filesystem;

        if let Some(s) = &existing.run_as_user {
            config.run_as_user = s.strategy;
        }
        if let Some(s) = &existing.run_as_group {
            config.run_as_group = s.strategy;
        }
        if let Some(s) = &existing.se_linux_context {
            config.se_linux_context = s.strategy;
        }
        if let Some(s) = &existing.fs_group {
            config.fs_group = s.strategy;
        }
        if let Some(s) = &existing.supplemental_groups {
            config.supplemental_groups = s.strategy;
        }

        config.allowed_capabilities = existing.allowed_capabilities.iter().cloned().collect();
        if !existing.required_drop_capabilities.is_empty() {
            config.required_drop_capabilities = existing
                .required_drop_capabilities
                .iter()
                .cloned()
                .collect();
        }
        // Anything already allowed must not simultaneously be required-drop.
        for cap in existing.allowed_capabilities.iter() {
            config.required_drop_capabilities.remove(cap);
        }
        config.default_add_capabilities =
            existing.default_add_capabilities.iter().cloned().collect();
        config.allowed_unsafe_sysctls = existing.allowed_unsafe_sysctls.iter().cloned().collect();
        config.forbidden_sysctls = existing.forbidden_sysctls.iter().cloned().collect();
        if !existing.volumes.is_empty() {
            config.allowed_volume_types = existing.volumes.iter().cloned().collect();
        }
        config.allowed_host_paths = existing.allowed_host_paths.clone().unwrap_or_default();
        config.allowed_flex_volumes = existing.allowed_flex_volumes.clone().unwrap_or_default();
        if let Some(profiles) = &existing.seccomp_profiles {
            config.seccomp_profiles = profiles.clone();
        }
        config.users = existing.users.clone();
        config.groups = existing.groups.clone();

        config.provenance = Provenance {
            resource_version: existing.metadata.resource_version.clone(),
            uid: existing.metadata.uid.clone(),
            creation_timestamp: existing.metadata.creation_timestamp.clone(),
            generated_at: existing
                .annotation(annotations::GENERATED_AT)
                .map(str::to_string),
            updated: false,
        };
        config
    }

    /// Marks this model as an update of an existing object; the serialized
    /// form will carry last-updated provenance.
    pub fn mark_updated(&mut self) {
        self.provenance.updated = true;
    }

    /// Whether this model was built from an existing cluster object.
    pub fn is_update(&self) -> bool {
        self.provenance.updated
    }

    /// Freezes the model into the wire object.
    pub fn to_resource(&self) -> SecurityContextConstraints {
        let mut anns = BTreeMap::new();
        anns.insert(
            annotations::DESCRIPTION.to_string(),
            self.description.clone(),
        );
        anns.insert(annotations::GENERATED_BY.to_string(), AGENT_NAME.to_string());
        anns.insert(
            annotations::GENERATED_AT.to_string(),
            self.provenance
                .generated_at
                .clone()
                .unwrap_or_else(timestamp),
        );
        if self.provenance.updated {
            anns.insert(annotations::UPDATED_BY.to_string(), AGENT_NAME.to_string());
            anns.insert(annotations::UPDATED_AT.to_string(), timestamp());
        }

        SecurityContextConstraints {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                annotations: Some(anns),
                resource_version: self.provenance.resource_version.clone(),
                uid: self.provenance.uid.clone(),
                creation_timestamp: self.provenance.creation_timestamp.clone(),
                ..Default::default()
            },
            priority: Some(self.priority),
            allow_privileged_container: self.allow_privileged_container,
            allow_host_network: self.allow_host_network,
            allow_host_pid: self.allow_host_pid,
            allow_host_ipc: self.allow_host_ipc,
            allow_host_ports: self.allow_host_ports,
            allow_host_dir_volume_plugin: self.allow_host_dir_volume_plugin,
            read_only_root_filesystem: self.read_only_root_filesystem,
            run_as_user: Some(self.run_as_user.options()),
            run_as_group: Some(self.run_as_group.options()),
            se_linux_context: Some(self.se_linux_context.options()),
            fs_group: Some(self.fs_group.options()),
            supplemental_groups: Some(self.supplemental_groups.options()),
            allowed_capabilities: self.allowed_capabilities.iter().cloned().collect(),
            required_drop_capabilities: self.required_drop_capabilities.iter().cloned().collect(),
            default_add_capabilities: self.default_add_capabilities.iter().cloned().collect(),
            allowed_unsafe_sysctls: self.allowed_unsafe_sysctls.iter().cloned().collect(),
            forbidden_sysctls: self.forbidden_sysctls.iter().cloned().collect(),
            volumes: self.allowed_volume_types.iter().cloned().collect(),
            users: self.users.clone(),
            groups: self.groups.clone(),
            allowed_flex_volumes: if self.allowed_flex_volumes.is_empty() {
                None
            } else {
                Some(self.allowed_flex_volumes.clone())
            },
            allowed_host_paths: if self.allowed_host_paths.is_empty() {
                None
            } else {
                Some(self.allowed_host_paths.clone())
            },
            seccomp_profiles: if self.seccomp_profiles.is_empty() {
                None
            } else {
                Some(self.seccomp_profiles.clone())
            },
            ..SecurityContextConstraints::new(self.name.clone())
        }
    }
}

fn timestamp() -> String {
    #[cfg(not(test))]
    let now = chrono::Utc::now();
    #[cfg(test)]
    let now = chrono::DateTime::<chrono::Utc>::MIN_UTC;
    now.to_rfc3339()
}
