//! The fixed catalog of pre-defined baseline SCCs and the decision table
//! that maps a requirement set onto the closest one.

use crate::requirement::{RequirementKind, RequirementSet, Severity};
use scc_agent_k8s_api::{SecurityContextConstraints, StrategyKind};
use std::fmt;

/// The catalog, most to least permissive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Template {
    Privileged,
    HostAccess,
    HostMountAnyUid,
    HostNetwork,
    AnyUid,
    NonRoot,
    Restricted,
}

pub const CATALOG: &[Template] = &[
    Template::Privileged,
    Template::HostAccess,
    Template::HostMountAnyUid,
    Template::HostNetwork,
    Template::AnyUid,
    Template::NonRoot,
    Template::Restricted,
];

/// Picks the baseline template that would admit the requirement set,
/// first-match-wins from most to least permissive.
pub fn suggest_template(set: &RequirementSet) -> Template {
    if set.requirements.is_empty() {
        return Template::Restricted;
    }

    let kinds = set.kinds();
    if kinds.contains(&RequirementKind::Privileged)
        || kinds.contains(&RequirementKind::HostNetwork)
        || kinds.contains(&RequirementKind::HostPid)
        || kinds.contains(&RequirementKind::HostIpc)
    {
        return Template::Privileged;
    }

    if kinds.contains(&RequirementKind::HostPath) {
        return if kinds.contains(&RequirementKind::RootUser) {
            Template::HostMountAnyUid
        } else {
            Template::HostAccess
        };
    }

    if kinds.contains(&RequirementKind::RootUser) {
        return Template::AnyUid;
    }

    if set
        .requirements
        .iter()
        .any(|req| req.severity() >= Severity::High)
    {
        return Template::NonRoot;
    }

    Template::Restricted
}

// === impl Template ===

impl Template {
    pub fn name(self) -> &'static str {
        match self {
            Self::Privileged => "privileged",
            Self::HostAccess => "hostaccess",
            Self::HostMountAnyUid => "hostmount-anyuid",
            Self::HostNetwork => "hostnetwork",
            Self::AnyUid => "anyuid",
            Self::NonRoot => "nonroot",
            Self::Restricted => "restricted",
        }
    }

    /// The template's fixed body, mirroring the cluster-shipped baselines.
    pub fn body(self) -> SecurityContextConstraints {
        match self {
            Self::Privileged => scc(self.name(), |s| {
                s.allow_privileged_container = true;
                s.allow_host_dir_volume_plugin = true;
                s.allow_host_ipc = true;
                s.allow_host_network = true;
                s.allow_host_pid = true;
                s.allow_host_ports = true;
                s.allowed_capabilities = vec!["*".to_string()];
                s.required_drop_capabilities = vec![];
                s.run_as_user = Some(StrategyKind::RunAsAny.options());
                s.se_linux_context = Some(StrategyKind::RunAsAny.options());
                s.fs_group = Some(StrategyKind::RunAsAny.options());
                s.supplemental_groups = Some(StrategyKind::RunAsAny.options());
                s.volumes = vec!["*".to_string()];
            }),
            Self::HostAccess => scc(self.name(), |s| {
                s.allow_host_dir_volume_plugin = true;
                s.allow_host_ipc = true;
                s.allow_host_network = true;
                s.allow_host_pid = true;
                s.allow_host_ports = true;
                s.required_drop_capabilities = drop_kill_mknod_setuid_setgid();
                s.run_as_user = Some(StrategyKind::MustRunAsRange.options());
                s.se_linux_context = Some(StrategyKind::MustRunAs.options());
                s.fs_group = Some(StrategyKind::MustRunAs.options());
                s.supplemental_groups = Some(StrategyKind::RunAsAny.options());
                s.volumes = with_host_path(base_volumes());
            }),
            Self::HostMountAnyUid => scc(self.name(), |s| {
                s.allow_host_dir_volume_plugin = true;
                s.required_drop_capabilities = vec!["MKNOD".to_string()];
                s.run_as_user = Some(StrategyKind::RunAsAny.options());
                s.se_linux_context = Some(StrategyKind::MustRunAs.options());
                s.fs_group = Some(StrategyKind::RunAsAny.options());
                s.supplemental_groups = Some(StrategyKind::RunAsAny.options());
                s.volumes = with_host_path(base_volumes());
            }),
            Self::HostNetwork => scc(self.name(), |s| {
                s.allow_host_network = true;
                s.allow_host_ports = true;
                s.required_drop_capabilities = drop_kill_mknod_setuid_setgid();
                s.run_as_user = Some(StrategyKind::MustRunAsRange.options());
                s.se_linux_context = Some(StrategyKind::MustRunAs.options());
                s.fs_group = Some(StrategyKind::MustRunAs.options());
                s.supplemental_groups = Some(StrategyKind::MustRunAs.options());
                s.volumes = base_volumes();
            }),
            Self::AnyUid => scc(self.name(), |s| {
                s.required_drop_capabilities = vec!["MKNOD".to_string()];
                s.run_as_user = Some(StrategyKind::RunAsAny.options());
                s.se_linux_context = Some(StrategyKind::MustRunAs.options());
                s.fs_group = Some(StrategyKind::RunAsAny.options());
                s.supplemental_groups = Some(StrategyKind::RunAsAny.options());
                s.volumes = base_volumes();
            }),
            Self::NonRoot => scc(self.name(), |s| {
                s.required_drop_capabilities = drop_kill_mknod_setuid_setgid();
                s.run_as_user = Some(StrategyKind::MustRunAsNonRoot.options());
                s.se_linux_context = Some(StrategyKind::MustRunAs.options());
                s.fs_group = Some(StrategyKind::RunAsAny.options());
                s.supplemental_groups = Some(StrategyKind::RunAsAny.options());
                s.volumes = base_volumes();
            }),
            Self::Restricted => scc(self.name(), |s| {
                s.required_drop_capabilities = drop_kill_mknod_setuid_setgid();
                s.run_as_user = Some(StrategyKind::MustRunAsRange.options());
                s.se_linux_context = Some(StrategyKind::MustRunAs.options());
                s.fs_group = Some(StrategyKind::MustRunAs.options());
                s.supplemental_groups = Some(StrategyKind::RunAsAny.options());
                s.volumes = base_volumes();
            }),
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl std::str::FromStr for Template {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATALOG
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown SCC template: {s:?}"))
    }
}

fn scc(
    name: &str,
    configure: impl FnOnce(&mut SecurityContextConstraints),
) -> SecurityContextConstraints {
    let mut s = SecurityContextConstraints::new(name);
    s.priority = Some(10);
    configure(&mut s);
    s
}

fn base_volumes() -> Vec<String> {
    crate::policy::BASE_VOLUME_TYPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn with_host_path(mut volumes: Vec<String>) -> Vec<String> {
    volumes.push("hostPath".to_string());
    volumes.sort();
    volumes
}

fn drop_kill_mknod_setuid_setgid() -> Vec<String> {
    ["KILL", "MKNOD", "SETUID", "SETGID"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::{Origin, Requirement};

    fn set_of(kinds: &[RequirementKind]) -> RequirementSet {
        let mut set = RequirementSet::new("test.yaml");
        for kind in kinds {
            set.requirements.push(Requirement {
                kind: *kind,
                value: true.into(),
                origin: Origin {
                    resource_kind: "Pod".to_string(),
                    resource_name: "p".to_string(),
                    namespace: "default".to_string(),
                    context: "pod".to_string(),
                },
            });
        }
        set
    }

    #[test]
    fn decision_table_matches_documented_triggers() {
        use RequirementKind::*;
        assert_eq!(suggest_template(&set_of(&[])), Template::Restricted);
        assert_eq!(suggest_template(&set_of(&[Privileged])), Template::Privileged);
        assert_eq!(suggest_template(&set_of(&[HostIpc])), Template::Privileged);
        assert_eq!(
            suggest_template(&set_of(&[HostPath, RootUser])),
            Template::HostMountAnyUid
        );
        assert_eq!(suggest_template(&set_of(&[HostPath])), Template::HostAccess);
        assert_eq!(suggest_template(&set_of(&[RootUser])), Template::AnyUid);
        assert_eq!(
            suggest_template(&set_of(&[Capabilities])),
            Template::NonRoot
        );
        assert_eq!(suggest_template(&set_of(&[FsGroup])), Template::Restricted);
    }

    #[test]
    fn privileged_trumps_host_path() {
        use RequirementKind::*;
        assert_eq!(
            suggest_template(&set_of(&[HostPath, RootUser, Privileged])),
            Template::Privileged
        );
    }

    #[test]
    fn bodies_parse_back_by_name() {
        for template in CATALOG {
            assert_eq!(
                template.name().parse::<Template>().unwrap(),
                *template,
                "template {template:?} should round-trip"
            );
            assert_eq!(template.body().name(), template.name());
        }
    }

    #[test]
    fn privileged_body_is_wide_open() {
        let body = Template::Privileged.body();
        assert!(body.allow_privileged_container);
        assert_eq!(body.volumes, vec!["*"]);
        assert!(body.required_drop_capabilities.is_empty());
    }
}
