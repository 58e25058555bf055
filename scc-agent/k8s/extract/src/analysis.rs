use crate::workload::extract_requirements;
use scc_agent_k8s_api::{manifest, Workload, WORKLOAD_KINDS};
use scc_agent_core::RequirementSet;
use tracing::{debug, warn};

/// Resource kinds the analyzer accepts. Anything else is recorded as a
/// warning and skipped.
pub const SUPPORTED_KINDS: &[&str] = &[
    "Pod",
    "Deployment",
    "ReplicaSet",
    "StatefulSet",
    "DaemonSet",
    "Job",
    "CronJob",
    "DeploymentConfig",
    "ServiceAccount",
    "Secret",
    "ConfigMap",
    "PersistentVolumeClaim",
    "Service",
    "Route",
    "Ingress",
    "NetworkPolicy",
    "PodSecurityPolicy",
    "SecurityContextConstraints",
    "Role",
    "RoleBinding",
    "ClusterRole",
    "ClusterRoleBinding",
];

/// Analyzes a YAML manifest stream. A stream that fails to parse contributes
/// an empty requirement set carrying the parse error.
pub fn analyze_str(source: &str, input: &str) -> RequirementSet {
    match manifest::split_documents(input) {
        Ok(documents) => analyze_documents(source, documents),
        Err(error) => {
            warn!(%error, source, "failed to parse manifest stream");
            let mut set = RequirementSet::new(source);
            set.errors.push(format!("failed to parse {source}: {error}"));
            set
        }
    }
}

/// Analyzes decoded manifest documents into a requirement set.
pub fn analyze_documents(
    source: impl Into<String>,
    documents: Vec<serde_json::Value>,
) -> RequirementSet {
    let mut set = RequirementSet::new(source);

    for doc in documents {
        let kind = manifest::kind_of(&doc).to_string();
        if kind.is_empty() {
            set.warnings.push("document without a kind".to_string());
            continue;
        }
        if !SUPPORTED_KINDS.contains(&kind.as_str()) {
            set.warnings
                .push(format!("unsupported resource kind: {kind}"));
            continue;
        }

        let namespace = manifest::namespace_of(&doc).to_string();
        set.namespaces.insert(namespace.clone());

        if kind == "ServiceAccount" {
            set.bind_service_account(manifest::name_of(&doc), namespace, None);
        } else if WORKLOAD_KINDS.contains(&kind.as_str()) {
            match Workload::from_document(&doc) {
                Ok(Some(workload)) => {
                    let requirements = extract_requirements(&workload);
                    debug!(
                        kind = workload.kind(),
                        name = workload.name(),
                        requirements = requirements.len(),
                        "extracted requirements"
                    );
                    if let Some(sa) = workload.service_account() {
                        let resource = format!("{}/{}", workload.kind(), workload.name());
                        set.bind_service_account(sa, namespace, Some(resource));
                    }
                    set.requirements.extend(requirements);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(%error, "skipping undecodable workload");
                    set.errors.push(error.to_string());
                }
            }
        }

        set.documents.push(doc);
    }

    debug!(
        source = %set.source,
        resources = set.documents.len(),
        requirements = set.requirements.len(),
        warnings = set.warnings.len(),
        "analysis complete"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use scc_agent_core::RequirementKind;

    const MIXED: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: runner
  namespace: prod
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
  namespace: prod
spec:
  selector: {}
  template:
    spec:
      serviceAccountName: runner
      hostNetwork: true
      containers:
        - name: app
          securityContext:
            runAsUser: 0
---
apiVersion: example.dev/v1
kind: FancyOperatorThing
metadata:
  name: unknown
"#;

    #[test]
    fn mixed_streams_yield_requirements_and_warnings() {
        let set = analyze_str("mixed.yaml", MIXED);

        assert_eq!(set.documents.len(), 2);
        assert_eq!(
            set.requirements.iter().map(|r| r.kind).collect::<Vec<_>>(),
            vec![RequirementKind::RootUser, RequirementKind::HostNetwork]
        );
        assert_eq!(set.warnings.len(), 1);
        assert!(set.warnings[0].contains("FancyOperatorThing"));
        assert!(set.errors.is_empty());
    }

    #[test]
    fn service_accounts_merge_declarations_and_references() {
        let set = analyze_str("mixed.yaml", MIXED);

        assert_eq!(set.service_accounts.len(), 1);
        let sa = &set.service_accounts[0];
        assert_eq!(sa.name, "runner");
        assert_eq!(sa.namespace, "prod");
        assert_eq!(sa.resources, vec!["Deployment/api"]);
    }

    #[test]
    fn unparseable_streams_degrade_to_an_empty_set() {
        let set = analyze_str("broken.yaml", "kind: [unterminated");
        assert!(set.documents.is_empty());
        assert!(set.requirements.is_empty());
        assert_eq!(set.errors.len(), 1);
    }

    #[test]
    fn undecodable_workloads_do_not_abort_the_batch() {
        let bad_then_good = r#"
kind: Deployment
metadata:
  name: broken
spec:
  template: "not a template"
---
kind: Pod
metadata:
  name: ok
spec:
  hostPID: true
  containers:
    - name: c
"#;
        let set = analyze_str("batch.yaml", bad_then_good);
        assert_eq!(set.errors.len(), 1);
        assert_eq!(set.requirements.len(), 1);
        assert_eq!(set.requirements[0].kind, RequirementKind::HostPid);
        // The undecodable document still rides along for deployment.
        assert_eq!(set.documents.len(), 2);
    }

    #[test]
    fn namespaces_default_when_unset() {
        let set = analyze_str(
            "ns.yaml",
            "kind: Pod\nmetadata:\n  name: p\nspec:\n  containers: []\n",
        );
        assert!(set.namespaces.contains("default"));
    }
}
