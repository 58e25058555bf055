use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{Pod, PodSpec, PodTemplateSpec},
};
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Resource kinds that carry a pod template and are eligible for requirement
/// extraction.
pub const WORKLOAD_KINDS: &[&str] = &[
    "Pod",
    "Deployment",
    "ReplicaSet",
    "StatefulSet",
    "DaemonSet",
    "Job",
    "CronJob",
    "DeploymentConfig",
];

/// A decoded workload resource with uniform access to its pod template.
///
/// The pod template's location varies by kind: a `Pod` carries it directly,
/// most controllers nest it under `spec.template`, and a `CronJob` nests it
/// one level further under `spec.jobTemplate`.
#[derive(Clone, Debug)]
pub enum Workload {
    Pod(Pod),
    Deployment(Deployment),
    ReplicaSet(ReplicaSet),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
    Job(Job),
    CronJob(CronJob),
    DeploymentConfig(DeploymentConfig),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to decode {kind} {name:?}: {source}")]
pub struct DecodeError {
    pub kind: String,
    pub name: Option<String>,
    #[source]
    source: serde_json::Error,
}

/// OpenShift's `DeploymentConfig`, reduced to the fields this crate reads.
///
/// The full resource lives outside `k8s-openapi`; only the pod template is
/// of interest here, so unknown fields are ignored on decode.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<DeploymentConfigSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeploymentConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplateSpec>,
}

// === impl Workload ===

impl Workload {
    /// Decodes a manifest document into a workload, returning `None` for
    /// non-workload kinds.
    pub fn from_document(doc: &serde_json::Value) -> Result<Option<Self>, DecodeError> {
        let kind = doc
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        macro_rules! decode {
            ($variant:ident) => {
                Self::$variant(serde_json::from_value(doc.clone()).map_err(|source| {
                    DecodeError {
                        kind: kind.to_string(),
                        name: doc
                            .pointer("/metadata/name")
                            .and_then(serde_json::Value::as_str)
                            .map(str::to_string),
                        source,
                    }
                })?)
            };
        }

        let workload = match kind {
            "Pod" => decode!(Pod),
            "Deployment" => decode!(Deployment),
            "ReplicaSet" => decode!(ReplicaSet),
            "StatefulSet" => decode!(StatefulSet),
            "DaemonSet" => decode!(DaemonSet),
            "Job" => decode!(Job),
            "CronJob" => decode!(CronJob),
            "DeploymentConfig" => decode!(DeploymentConfig),
            _ => return Ok(None),
        };
        Ok(Some(workload))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pod(_) => "Pod",
            Self::Deployment(_) => "Deployment",
            Self::ReplicaSet(_) => "ReplicaSet",
            Self::StatefulSet(_) => "StatefulSet",
            Self::DaemonSet(_) => "DaemonSet",
            Self::Job(_) => "Job",
            Self::CronJob(_) => "CronJob",
            Self::DeploymentConfig(_) => "DeploymentConfig",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Pod(p) => &p.metadata,
            Self::Deployment(d) => &d.metadata,
            Self::ReplicaSet(rs) => &rs.metadata,
            Self::StatefulSet(ss) => &ss.metadata,
            Self::DaemonSet(ds) => &ds.metadata,
            Self::Job(j) => &j.metadata,
            Self::CronJob(cj) => &cj.metadata,
            Self::DeploymentConfig(dc) => &dc.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or("unknown")
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or("default")
    }

    /// The effective pod spec, if the resource carries one.
    pub fn pod_spec(&self) -> Option<&PodSpec> {
        fn template(t: &PodTemplateSpec) -> Option<&PodSpec> {
            t.spec.as_ref()
        }

        match self {
            Self::Pod(p) => p.spec.as_ref(),
            Self::Deployment(d) => d.spec.as_ref().and_then(|s| template(&s.template)),
            Self::ReplicaSet(rs) => rs
                .spec
                .as_ref()
                .and_then(|s| s.template.as_ref())
                .and_then(template),
            Self::StatefulSet(ss) => ss.spec.as_ref().and_then(|s| template(&s.template)),
            Self::DaemonSet(ds) => ds.spec.as_ref().and_then(|s| template(&s.template)),
            Self::Job(j) => j.spec.as_ref().and_then(|s| template(&s.template)),
            Self::CronJob(cj) => cj
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .and_then(|js| template(&js.template)),
            Self::DeploymentConfig(dc) => dc
                .spec
                .as_ref()
                .and_then(|s| s.template.as_ref())
                .and_then(template),
        }
    }

    /// The service account the pod template runs as, if one is named.
    pub fn service_account(&self) -> Option<&str> {
        let spec = self.pod_spec()?;
        spec.service_account_name
            .as_deref()
            .or(spec.service_account.as_deref())
    }
}
