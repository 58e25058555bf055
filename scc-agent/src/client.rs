//! A `ClusterApi` implementation over the kube dynamic-object client.

use anyhow::{Context, Result};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams},
    Client,
};
use scc_agent_core::{ClusterApi, DeploymentOutcome};
use scc_agent_k8s_api::{manifest, rbac, scc, ClusterRole, RoleBinding, SecurityContextConstraints};
use tracing::{debug, info};

pub struct KubeCluster {
    client: Client,
}

// === impl KubeCluster ===

impl KubeCluster {
    /// Connects using the ambient kubeconfig (or in-cluster config).
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("failed to initialize the Kubernetes client")?;
        info!("connected to cluster");
        Ok(Self { client })
    }

    fn sccs(&self) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(rbac::SCC_API_GROUP, "v1", scc::KIND);
        // The kind's plural is irregular; the naive pluralizer gets it wrong.
        let resource = ApiResource::from_gvk_with_plural(&gvk, "securitycontextconstraints");
        Api::all_with(self.client.clone(), &resource)
    }

    /// Builds a dynamic API handle for an arbitrary manifest document.
    fn api_for(&self, doc: &serde_json::Value, namespace: &str) -> Api<DynamicObject> {
        let api_version = doc
            .get("apiVersion")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("v1");
        let kind = manifest::kind_of(doc);
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = if kind == scc::KIND {
            ApiResource::from_gvk_with_plural(&gvk, "securitycontextconstraints")
        } else {
            ApiResource::from_gvk(&gvk)
        };
        if manifest::cluster_scoped(kind) {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        }
    }

    fn to_dynamic<T: serde::Serialize>(object: &T) -> Result<DynamicObject> {
        serde_json::from_value(serde_json::to_value(object)?)
            .context("object is not a valid Kubernetes resource")
    }
}

fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 409)
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn get_scc(&self, name: &str) -> Result<Option<SecurityContextConstraints>> {
        let object = self
            .sccs()
            .get_opt(name)
            .await
            .with_context(|| format!("failed to fetch SCC {name}"))?;
        match object {
            Some(object) => Ok(Some(serde_json::from_value(serde_json::to_value(object)?)?)),
            None => Ok(None),
        }
    }

    async fn create_scc(&self, scc: &SecurityContextConstraints) -> Result<()> {
        let object = Self::to_dynamic(scc)?;
        match self.sccs().create(&PostParams::default(), &object).await {
            Ok(_) => {
                info!(name = scc.name(), "created SCC");
                Ok(())
            }
            Err(error) if is_conflict(&error) => {
                debug!(name = scc.name(), "SCC exists, replacing");
                self.replace_scc(scc).await
            }
            Err(error) => {
                Err(error).with_context(|| format!("failed to create SCC {}", scc.name()))
            }
        }
    }

    async fn replace_scc(&self, scc: &SecurityContextConstraints) -> Result<()> {
        let api = self.sccs();
        let existing = api
            .get_opt(scc.name())
            .await
            .with_context(|| format!("failed to fetch SCC {}", scc.name()))?;
        let existing = match existing {
            Some(existing) => existing,
            None => {
                debug!(name = scc.name(), "SCC vanished, creating");
                let object = Self::to_dynamic(scc)?;
                api.create(&PostParams::default(), &object)
                    .await
                    .with_context(|| format!("failed to create SCC {}", scc.name()))?;
                return Ok(());
            }
        };

        let mut object = Self::to_dynamic(scc)?;
        // Replacement must carry the live resourceVersion.
        object.metadata.resource_version = existing.metadata.resource_version;
        api.replace(scc.name(), &PostParams::default(), &object)
            .await
            .with_context(|| format!("failed to replace SCC {}", scc.name()))?;
        info!(name = scc.name(), "replaced SCC");
        Ok(())
    }

    async fn delete_scc(&self, name: &str) -> Result<()> {
        match self.sccs().delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name, "deleted SCC");
                Ok(())
            }
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(error).with_context(|| format!("failed to delete SCC {name}")),
        }
    }

    async fn list_sccs(&self) -> Result<Vec<SecurityContextConstraints>> {
        let objects = self
            .sccs()
            .list(&ListParams::default())
            .await
            .context("failed to list SCCs")?;
        objects
            .items
            .into_iter()
            .map(|object| Ok(serde_json::from_value(serde_json::to_value(object)?)?))
            .collect()
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<()> {
        let api = Api::<ClusterRole>::all(self.client.clone());
        match api.create(&PostParams::default(), role).await {
            Ok(_) => Ok(()),
            Err(error) if is_conflict(&error) => {
                debug!(name = ?role.metadata.name, "cluster role already exists");
                Ok(())
            }
            Err(error) => Err(error).context("failed to create cluster role"),
        }
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<()> {
        let namespace = binding.metadata.namespace.as_deref().unwrap_or("default");
        let api = Api::<RoleBinding>::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), binding).await {
            Ok(_) => Ok(()),
            Err(error) if is_conflict(&error) => {
                debug!(name = ?binding.metadata.name, "role binding already exists");
                Ok(())
            }
            Err(error) => Err(error).context("failed to create role binding"),
        }
    }

    async fn apply_document(
        &self,
        doc: &serde_json::Value,
        namespace: Option<&str>,
        dry_run: bool,
    ) -> DeploymentOutcome {
        let mut doc = doc.clone();
        let kind = manifest::kind_of(&doc).to_string();
        if let Some(namespace) = namespace {
            if !manifest::cluster_scoped(&kind) {
                doc["metadata"]["namespace"] = namespace.into();
            }
        }
        let name = manifest::name_of(&doc).to_string();
        let target_namespace = manifest::namespace_of(&doc).to_string();

        let params = PostParams {
            dry_run,
            ..Default::default()
        };
        let attempt: Result<()> = async {
            let object: DynamicObject =
                serde_json::from_value(doc.clone()).context("document is not a valid resource")?;
            self.api_for(&doc, &target_namespace)
                .create(&params, &object)
                .await?;
            Ok(())
        }
        .await;

        match attempt {
            Ok(()) => {
                debug!(%kind, %name, namespace = %target_namespace, dry_run, "applied resource");
                DeploymentOutcome::success(kind, name, target_namespace)
            }
            Err(error) => DeploymentOutcome::failure(
                kind,
                name,
                target_namespace,
                format!("{error:#}"),
            ),
        }
    }

    async fn scc_for_service_account(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<SecurityContextConstraints>> {
        // Direct user grants on the SCC itself.
        let user = format!("system:serviceaccount:{namespace}:{name}");
        for scc in self.list_sccs().await? {
            if scc.users.contains(&user) {
                return Ok(Some(scc));
            }
        }

        // Role bindings onto a `use`-role for some SCC.
        let bindings = Api::<RoleBinding>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list role bindings in {namespace}"))?;
        for binding in bindings.items {
            let targets_sa = binding.subjects.iter().flatten().any(|subject| {
                subject.kind == "ServiceAccount"
                    && subject.name == name
                    && subject.namespace.as_deref().unwrap_or(namespace) == namespace
            });
            if !targets_sa {
                continue;
            }
            if let Some(scc_name) = binding
                .role_ref
                .name
                .strip_prefix("system:openshift:scc:")
            {
                if let Some(scc) = self.get_scc(scc_name).await? {
                    return Ok(Some(scc));
                }
            }
        }
        Ok(None)
    }
}
