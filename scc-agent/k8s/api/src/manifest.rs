//! Multi-document manifest handling: splitting YAML streams and ordering
//! documents for application against a cluster.

use serde::Deserialize;

/// Kinds ordered by the sequence in which they should be applied. Namespaces,
/// admission policy, and identities must exist before the workloads that
/// depend on them.
const APPLY_ORDER: &[&str] = &[
    "Namespace",
    "SecurityContextConstraints",
    "ServiceAccount",
    "Secret",
    "ConfigMap",
    "PersistentVolumeClaim",
    "Role",
    "ClusterRole",
    "RoleBinding",
    "ClusterRoleBinding",
    "Service",
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "Job",
    "CronJob",
    "Pod",
    "Route",
    "Ingress",
];

/// Splits a (possibly multi-document) YAML stream into JSON documents.
///
/// Null documents and non-mapping documents are dropped. A syntax error fails
/// the whole stream; callers degrade the file to an empty contribution rather
/// than aborting the batch.
pub fn split_documents(input: &str) -> Result<Vec<serde_json::Value>, serde_yaml::Error> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(input) {
        let value = serde_json::Value::deserialize(de)?;
        if value.is_object() {
            docs.push(value);
        }
    }
    Ok(docs)
}

pub fn kind_of(doc: &serde_json::Value) -> &str {
    doc.get("kind")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
}

pub fn name_of(doc: &serde_json::Value) -> &str {
    doc.pointer("/metadata/name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
}

pub fn namespace_of(doc: &serde_json::Value) -> &str {
    doc.pointer("/metadata/namespace")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("default")
}

/// Whether a kind lives outside any namespace.
pub fn cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "SecurityContextConstraints"
            | "PersistentVolume"
            | "CustomResourceDefinition"
    )
}

fn apply_priority(kind: &str) -> usize {
    APPLY_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(APPLY_ORDER.len())
}

/// Stable-sorts documents into apply order.
pub fn sort_for_apply(docs: &mut [serde_json::Value]) {
    docs.sort_by_key(|doc| apply_priority(kind_of(doc)));
}
