use crate::outcome::DeploymentOutcome;
use anyhow::Result;
use scc_agent_k8s_api::{ClusterRole, RoleBinding, SecurityContextConstraints};

/// The cluster operations this crate consumes, kept behind a trait so the
/// engines and the reconcile controller can run against a stub in tests.
///
/// Deploy attempts report through [`DeploymentOutcome`] rather than `Err`:
/// a rejected resource is data the controller reasons over, not a fault.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_scc(&self, name: &str) -> Result<Option<SecurityContextConstraints>>;

    async fn create_scc(&self, scc: &SecurityContextConstraints) -> Result<()>;

    /// Replaces the named SCC, creating it if absent.
    async fn replace_scc(&self, scc: &SecurityContextConstraints) -> Result<()>;

    async fn delete_scc(&self, name: &str) -> Result<()>;

    async fn list_sccs(&self) -> Result<Vec<SecurityContextConstraints>>;

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()>;

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<()>;

    /// Attempts to realize one manifest document in the cluster.
    async fn apply_document(
        &self,
        doc: &serde_json::Value,
        namespace: Option<&str>,
        dry_run: bool,
    ) -> DeploymentOutcome;

    /// Finds an SCC the given service account is already bound to, if any.
    async fn scc_for_service_account(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<SecurityContextConstraints>>;
}
