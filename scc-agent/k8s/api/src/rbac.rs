//! Builders for the RBAC objects that grant service accounts the `use`
//! permission on a generated SCC.

use crate::scc::annotations;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding, RoleRef, Subject,
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const SCC_API_GROUP: &str = "security.openshift.io";
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// The conventional name of the cluster role that permits use of an SCC.
pub fn use_role_name(scc_name: &str) -> String {
    format!("system:openshift:scc:{scc_name}")
}

/// A single-rule cluster role allowing `use` of the named SCC.
pub fn cluster_role(scc_name: &str, generated_by: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(use_role_name(scc_name)),
            annotations: Some(provenance(generated_by)),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![SCC_API_GROUP.to_string()]),
            resources: Some(vec!["securitycontextconstraints".to_string()]),
            resource_names: Some(vec![scc_name.to_string()]),
            verbs: vec!["use".to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Binds one service account to the SCC's use-role within its namespace.
pub fn role_binding(
    scc_name: &str,
    service_account: &str,
    namespace: &str,
    generated_by: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("scc-{scc_name}-{service_account}")),
            namespace: Some(namespace.to_string()),
            annotations: Some(provenance(generated_by)),
            ..Default::default()
        },
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
        role_ref: use_role_ref(scc_name),
    }
}

/// Binds one service account to the SCC's use-role cluster-wide.
pub fn cluster_role_binding(
    scc_name: &str,
    service_account: &str,
    namespace: &str,
    generated_by: &str,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("scc-{scc_name}-{service_account}-{namespace}")),
            annotations: Some(provenance(generated_by)),
            ..Default::default()
        },
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
        role_ref: use_role_ref(scc_name),
    }
}

fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn use_role_ref(scc_name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: "ClusterRole".to_string(),
        name: use_role_name(scc_name),
    }
}

fn provenance(generated_by: &str) -> BTreeMap<String, String> {
    let mut anns = BTreeMap::new();
    anns.insert(
        annotations::GENERATED_BY.to_string(),
        generated_by.to_string(),
    );
    anns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_grants_use_of_one_scc() {
        let role = cluster_role("payments-scc", "scc-agent");
        assert_eq!(
            role.metadata.name.as_deref(),
            Some("system:openshift:scc:payments-scc")
        );
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].verbs, vec!["use"]);
        assert_eq!(
            rules[0].resource_names,
            Some(vec!["payments-scc".to_string()])
        );
    }

    #[test]
    fn binding_subject_is_namespaced_service_account() {
        let rb = role_binding("payments-scc", "payments", "prod", "scc-agent");
        assert_eq!(rb.metadata.namespace.as_deref(), Some("prod"));
        let subjects = rb.subjects.unwrap();
        assert_eq!(subjects[0].kind, "ServiceAccount");
        assert_eq!(subjects[0].name, "payments");
        assert_eq!(subjects[0].namespace.as_deref(), Some("prod"));
        assert_eq!(rb.role_ref.name, "system:openshift:scc:payments-scc");
    }

    #[test]
    fn cluster_binding_name_disambiguates_by_namespace() {
        let crb = cluster_role_binding("payments-scc", "payments", "prod", "scc-agent");
        assert_eq!(
            crb.metadata.name.as_deref(),
            Some("scc-payments-scc-payments-prod")
        );
        assert_eq!(crb.metadata.namespace, None);
        assert_eq!(
            crb.subjects.unwrap()[0].namespace.as_deref(),
            Some("prod")
        );
    }
}
