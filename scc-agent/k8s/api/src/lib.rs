#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod manifest;
pub mod rbac;
pub mod scc;
mod workload;

pub use self::{
    scc::{AllowedHostPath, SecurityContextConstraints, StrategyKind, StrategyOptions},
    workload::{DecodeError, DeploymentConfig, Workload, WORKLOAD_KINDS},
};
pub use k8s_openapi::api::{
    self,
    core::v1::{Container, Pod, PodSecurityContext, PodSpec, PodTemplateSpec, SecurityContext},
    rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding},
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
pub use kube::api::{ObjectMeta, ResourceExt};
