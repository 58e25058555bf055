use scc_agent_core::{Origin, Requirement, RequirementKind, RequirementValue};
use scc_agent_k8s_api::{Container, PodSecurityContext, Workload};
use std::collections::BTreeMap;

/// Extracts every privilege signal from a workload's pod template.
///
/// Emission order is traversal order: containers, then init containers, then
/// pod scope. Requirements are not deduplicated here.
pub fn extract_requirements(workload: &Workload) -> Vec<Requirement> {
    let mut requirements = Vec::new();
    let spec = match workload.pod_spec() {
        Some(spec) => spec,
        None => return requirements,
    };
    let pod_context = spec.security_context.as_ref();

    let containers = spec
        .containers
        .iter()
        .chain(spec.init_containers.iter().flatten());
    for container in containers {
        scan_container(workload, container, pod_context, &mut requirements);
    }

    let mut emit = |kind: RequirementKind, value: RequirementValue, context: &str| {
        requirements.push(requirement(workload, kind, value, context))
    };

    if spec.host_network == Some(true) {
        emit(RequirementKind::HostNetwork, true.into(), "pod");
    }
    if spec.host_pid == Some(true) {
        emit(RequirementKind::HostPid, true.into(), "pod");
    }
    if spec.host_ipc == Some(true) {
        emit(RequirementKind::HostIpc, true.into(), "pod");
    }

    for volume in spec.volumes.iter().flatten() {
        if let Some(host_path) = &volume.host_path {
            emit(
                RequirementKind::HostPath,
                host_path.path.as_str().into(),
                &format!("volume/{}", volume.name),
            );
        }
    }

    if let Some(context) = pod_context {
        if let Some(fs_group) = context.fs_group {
            emit(RequirementKind::FsGroup, fs_group.into(), "pod");
        }
        match &context.supplemental_groups {
            Some(groups) if !groups.is_empty() => {
                emit(
                    RequirementKind::SupplementalGroups,
                    RequirementValue::Ids(groups.clone()),
                    "pod",
                );
            }
            _ => {}
        }
        if let Some(selinux) = &context.se_linux_options {
            let mut options = BTreeMap::new();
            if let Some(level) = &selinux.level {
                options.insert("level".to_string(), level.clone());
            }
            if let Some(role) = &selinux.role {
                options.insert("role".to_string(), role.clone());
            }
            if let Some(type_) = &selinux.type_ {
                options.insert("type".to_string(), type_.clone());
            }
            if let Some(user) = &selinux.user {
                options.insert("user".to_string(), user.clone());
            }
            emit(RequirementKind::Selinux, RequirementValue::Options(options), "pod");
        }
    }

    requirements
}

/// Scans one container's effective security context. A container-level
/// `runAsUser` overrides the pod-level value.
fn scan_container(
    workload: &Workload,
    container: &Container,
    pod_context: Option<&PodSecurityContext>,
    requirements: &mut Vec<Requirement>,
) {
    let context = format!("container/{}", container.name);
    let security = container.security_context.as_ref();

    if security.and_then(|s| s.privileged) == Some(true) {
        requirements.push(requirement(
            workload,
            RequirementKind::Privileged,
            true.into(),
            &context,
        ));
    }

    let run_as_user = security
        .and_then(|s| s.run_as_user)
        .or_else(|| pod_context.and_then(|s| s.run_as_user));
    if run_as_user == Some(0) {
        requirements.push(requirement(
            workload,
            RequirementKind::RootUser,
            0i64.into(),
            &context,
        ));
    }

    let added = security
        .and_then(|s| s.capabilities.as_ref())
        .and_then(|c| c.add.as_ref());
    match added {
        Some(add) if !add.is_empty() => {
            requirements.push(requirement(
                workload,
                RequirementKind::Capabilities,
                RequirementValue::List(add.clone()),
                &context,
            ));
        }
        _ => {}
    }
}

fn requirement(
    workload: &Workload,
    kind: RequirementKind,
    value: RequirementValue,
    context: &str,
) -> Requirement {
    Requirement {
        kind,
        value,
        origin: Origin {
            resource_kind: workload.kind().to_string(),
            resource_name: workload.name().to_string(),
            namespace: workload.namespace().to_string(),
            context: context.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workload(doc: serde_json::Value) -> Workload {
        Workload::from_document(&doc).unwrap().unwrap()
    }

    #[test]
    fn privileged_and_capabilities_are_scoped_to_containers() {
        let w = workload(json!({
            "kind": "Pod",
            "metadata": {"name": "edge", "namespace": "net"},
            "spec": {
                "containers": [
                    {
                        "name": "proxy",
                        "securityContext": {
                            "privileged": true,
                            "capabilities": {"add": ["NET_ADMIN", "NET_RAW"]},
                        },
                    },
                    {"name": "sidecar"},
                ],
            },
        }));

        let reqs = extract_requirements(&w);
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].kind, RequirementKind::Privileged);
        assert_eq!(reqs[0].origin.context, "container/proxy");
        assert_eq!(reqs[1].kind, RequirementKind::Capabilities);
        assert_eq!(
            reqs[1].value,
            RequirementValue::List(vec!["NET_ADMIN".to_string(), "NET_RAW".to_string()])
        );
    }

    #[test]
    fn container_run_as_user_overrides_pod_level() {
        let w = workload(json!({
            "kind": "Pod",
            "metadata": {"name": "p"},
            "spec": {
                "securityContext": {"runAsUser": 0},
                "containers": [
                    {"name": "inherits-root"},
                    {"name": "droppped", "securityContext": {"runAsUser": 1000}},
                ],
            },
        }));

        let reqs = extract_requirements(&w);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].kind, RequirementKind::RootUser);
        assert_eq!(reqs[0].origin.context, "container/inherits-root");
    }

    #[test]
    fn init_containers_are_scanned_after_containers() {
        let w = workload(json!({
            "kind": "Job",
            "metadata": {"name": "setup"},
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{"name": "main"}],
                        "initContainers": [
                            {"name": "init", "securityContext": {"privileged": true}},
                        ],
                    },
                },
            },
        }));

        let reqs = extract_requirements(&w);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].origin.context, "container/init");
        assert_eq!(reqs[0].origin.resource_kind, "Job");
    }

    #[test]
    fn pod_scope_signals_follow_container_signals() {
        let w = workload(json!({
            "kind": "DaemonSet",
            "metadata": {"name": "node-agent", "namespace": "kube-system"},
            "spec": {
                "selector": {},
                "template": {
                    "spec": {
                        "hostNetwork": true,
                        "hostPID": true,
                        "containers": [{
                            "name": "agent",
                            "securityContext": {"runAsUser": 0},
                        }],
                        "volumes": [
                            {"name": "logs", "hostPath": {"path": "/var/log"}},
                            {"name": "tmp", "emptyDir": {}},
                        ],
                        "securityContext": {
                            "fsGroup": 2000,
                            "supplementalGroups": [5555],
                            "seLinuxOptions": {"level": "s0:c123,c456"},
                        },
                    },
                },
            },
        }));

        let kinds: Vec<RequirementKind> =
            extract_requirements(&w).iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RequirementKind::RootUser,
                RequirementKind::HostNetwork,
                RequirementKind::HostPid,
                RequirementKind::HostPath,
                RequirementKind::FsGroup,
                RequirementKind::SupplementalGroups,
                RequirementKind::Selinux,
            ]
        );

        let reqs = extract_requirements(&w);
        let host_path = reqs
            .iter()
            .find(|r| r.kind == RequirementKind::HostPath)
            .unwrap();
        assert_eq!(host_path.value, RequirementValue::Text("/var/log".to_string()));
        assert_eq!(host_path.origin.context, "volume/logs");
    }

    #[test]
    fn unset_contexts_emit_nothing() {
        let w = workload(json!({
            "kind": "Deployment",
            "metadata": {"name": "quiet"},
            "spec": {
                "selector": {},
                "template": {"spec": {"containers": [{"name": "app"}]}},
            },
        }));
        assert!(extract_requirements(&w).is_empty());
    }
}
