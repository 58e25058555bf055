//! The SCC synthesis & merge engine: folds extracted requirements into a
//! policy model, merges into existing policies without revoking grants, and
//! resolves which policy identity an analysis run targets.

use crate::{
    cluster::ClusterApi,
    policy::{SccConfig, BASE_VOLUME_TYPES},
    requirement::{Requirement, RequirementKind, RequirementSet},
};
use anyhow::Result;
use scc_agent_k8s_api::{SecurityContextConstraints, StrategyKind};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Folds one requirement into the policy model.
///
/// Every arm is idempotent and set-unioning, so folding a requirement twice
/// (or folding requirements in any order) produces the same model. The match
/// is exhaustive over the kind set: adding a kind without deciding its rule
/// is a compile error.
pub fn apply_requirement(config: &mut SccConfig, req: &Requirement) {
    match req.kind {
        RequirementKind::Privileged => {
            config.allow_privileged_container = true;
            config.run_as_user = StrategyKind::RunAsAny;
            config.allow_volume_type("hostPath");
            config.allow_volume_type("flexVolume");
            config.allow_host_dir_volume_plugin = true;
        }
        RequirementKind::RootUser => {
            config.run_as_user = StrategyKind::RunAsAny;
        }
        RequirementKind::HostNetwork => {
            config.allow_host_network = true;
            config.allow_host_ports = true;
        }
        RequirementKind::HostPid => {
            config.allow_host_pid = true;
        }
        RequirementKind::HostIpc => {
            config.allow_host_ipc = true;
        }
        RequirementKind::HostPath => {
            config.allow_volume_type("hostPath");
            if let Some(path) = req.value.as_str() {
                config.allow_host_path(path, false);
            }
        }
        RequirementKind::Capabilities => {
            for cap in req.value.iter_strings() {
                config.allow_capability(cap);
            }
        }
        RequirementKind::Selinux => {
            config.se_linux_context = StrategyKind::RunAsAny;
        }
        RequirementKind::FsGroup => {
            config.fs_group = StrategyKind::RunAsAny;
        }
        RequirementKind::SupplementalGroups => {
            config.supplemental_groups = StrategyKind::RunAsAny;
        }
        RequirementKind::Volumes => {
            for volume_type in req.value.iter_strings() {
                config.allow_volume_type(volume_type);
            }
        }
        // These signals don't map onto any SCC field.
        RequirementKind::Seccomp
        | RequirementKind::Apparmor
        | RequirementKind::Ports
        | RequirementKind::ResourceLimits => {}
    }
}

/// Synthesizes a fresh policy from an all-restrictive base.
pub fn synthesize(name: &str, set: &RequirementSet) -> SccConfig {
    debug!(name, requirements = set.requirements.len(), "synthesizing SCC");
    let mut config = SccConfig::restricted(name);
    config.description = format!("Generated SCC for manifests from {}", set.source);
    for req in &set.requirements {
        apply_requirement(&mut config, req);
    }
    config
}

/// Folds a new requirement set into an existing policy.
///
/// The existing object's grants are the floor: permissions are only ever
/// added, and its name and immutable identifiers pass through untouched.
pub fn update(existing: &SecurityContextConstraints, set: &RequirementSet) -> SccConfig {
    debug!(
        name = existing.name(),
        requirements = set.requirements.len(),
        "updating existing SCC"
    );
    let mut config = SccConfig::from_resource(existing);
    for req in &set.requirements {
        apply_requirement(&mut config, req);
    }
    config.description = format!("Updated SCC for manifests from {}", set.source);
    config.mark_updated();
    config
}

/// Recomputes the capability and volume-type grants as exactly what the
/// requirement set currently justifies (plus the base defaults).
///
/// This is the only operation permitted to shrink a permission set; it never
/// runs implicitly.
pub fn optimize(config: &mut SccConfig, set: &RequirementSet) {
    let mut capabilities = BTreeSet::new();
    let mut volumes: BTreeSet<String> =
        BASE_VOLUME_TYPES.iter().map(|s| s.to_string()).collect();

    for req in &set.requirements {
        match req.kind {
            RequirementKind::Capabilities => {
                capabilities.extend(req.value.iter_strings().map(str::to_string));
            }
            RequirementKind::HostPath => {
                volumes.insert("hostPath".to_string());
            }
            RequirementKind::Volumes => {
                volumes.extend(req.value.iter_strings().map(str::to_string));
            }
            _ => {}
        }
    }

    info!(
        name = %config.name,
        capabilities = capabilities.len(),
        volumes = volumes.len(),
        "optimized grants down to current requirements"
    );
    config.allowed_capabilities = capabilities;
    config.allowed_volume_types = volumes;
}

/// The policy identity an analysis run targets.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyIdentity {
    /// Synthesize a fresh policy under this name.
    Fresh(String),
    /// Fold into this existing policy; its name is authoritative.
    Update(Box<SecurityContextConstraints>),
}

/// Resolves the target identity from the competing name sources.
///
/// Precedence: a policy already bound to one of the set's service accounts
/// wins outright (identity continuity beats an operator-supplied label); then
/// an explicit name (fresh target); then a policy embedded in the manifest
/// set (update target); finally a deterministic name derived from the source.
/// `force_new` skips discovery and the embedded policy entirely.
pub async fn resolve_identity(
    set: &RequirementSet,
    explicit_name: Option<&str>,
    force_new: bool,
    cluster: Option<&dyn ClusterApi>,
) -> Result<PolicyIdentity> {
    if !force_new {
        if let Some(cluster) = cluster {
            for sa in &set.service_accounts {
                if let Some(existing) =
                    cluster.scc_for_service_account(&sa.name, &sa.namespace).await?
                {
                    info!(
                        scc = existing.name(),
                        service_account = %sa.name,
                        namespace = %sa.namespace,
                        "found SCC already bound to a service account"
                    );
                    return Ok(PolicyIdentity::Update(Box::new(existing)));
                }
            }
        }
    }

    if force_new {
        let name = explicit_name
            .map(str::to_string)
            .unwrap_or_else(|| fallback_name(&set.source));
        return Ok(PolicyIdentity::Fresh(name));
    }

    if let Some(name) = explicit_name {
        return Ok(PolicyIdentity::Fresh(name.to_string()));
    }

    if let Some(embedded) = set.embedded_policy() {
        info!(scc = embedded.name(), "using SCC embedded in the manifest set");
        return Ok(PolicyIdentity::Update(Box::new(embedded)));
    }

    Ok(PolicyIdentity::Fresh(fallback_name(&set.source)))
}

/// Resolves identity, then synthesizes or updates accordingly.
pub async fn generate_or_update(
    set: &RequirementSet,
    explicit_name: Option<&str>,
    force_new: bool,
    cluster: Option<&dyn ClusterApi>,
) -> Result<SecurityContextConstraints> {
    let identity = resolve_identity(set, explicit_name, force_new, cluster).await?;
    let config = match identity {
        PolicyIdentity::Fresh(name) => synthesize(&name, set),
        PolicyIdentity::Update(existing) => update(&existing, set),
    };
    Ok(config.to_resource())
}

/// Derives a deterministic, collision-resistant policy name from the source
/// identifier of an analysis run.
pub fn fallback_name(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let slug: String = source
        .rsplit('/')
        .next()
        .unwrap_or(source)
        .trim_end_matches(".yaml")
        .trim_end_matches(".yml")
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "generated" } else { slug };
    let slug: String = slug.chars().take(24).collect();
    format!(
        "scc-{}-{:02x}{:02x}{:02x}{:02x}",
        slug.trim_matches('-'),
        digest[0],
        digest[1],
        digest[2],
        digest[3]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::DeploymentOutcome;
    use crate::requirement::{Origin, RequirementValue};
    use scc_agent_k8s_api::{ClusterRole, RoleBinding};
    use std::collections::HashMap;

    fn origin(context: &str) -> Origin {
        Origin {
            resource_kind: "Deployment".to_string(),
            resource_name: "app".to_string(),
            namespace: "default".to_string(),
            context: context.to_string(),
        }
    }

    fn req(kind: RequirementKind, value: RequirementValue) -> Requirement {
        Requirement {
            kind,
            value,
            origin: origin("pod"),
        }
    }

    fn set_with(requirements: Vec<Requirement>) -> RequirementSet {
        RequirementSet {
            requirements,
            ..RequirementSet::new("manifests/app.yaml")
        }
    }

    #[test]
    fn privileged_workload_opens_host_volumes() {
        let set = set_with(vec![req(RequirementKind::Privileged, true.into())]);
        let config = synthesize("app-scc", &set);

        assert!(config.allow_privileged_container);
        assert_eq!(config.run_as_user, StrategyKind::RunAsAny);
        assert!(config.allow_host_dir_volume_plugin);
        assert!(config.allowed_volume_types.contains("hostPath"));
        assert!(config.allowed_volume_types.contains("flexVolume"));
    }

    #[test]
    fn folding_is_idempotent() {
        let reqs = vec![
            req(RequirementKind::Privileged, true.into()),
            req(RequirementKind::HostPath, "/var/log".into()),
            req(
                RequirementKind::Capabilities,
                vec!["NET_ADMIN".to_string(), "SYS_TIME".to_string()].into(),
            ),
            req(RequirementKind::HostNetwork, true.into()),
        ];
        let once = set_with(reqs.clone());
        let twice = set_with(reqs.iter().cloned().chain(reqs.clone()).collect());

        let a = synthesize("app-scc", &once).to_resource();
        let b = synthesize("app-scc", &twice).to_resource();
        assert_eq!(a, b);
    }

    #[test]
    fn capability_invariant_holds_after_synthesis() {
        let set = set_with(vec![req(
            RequirementKind::Capabilities,
            vec!["KILL".to_string(), "NET_ADMIN".to_string()].into(),
        )]);
        let config = synthesize("app-scc", &set);
        assert!(config
            .allowed_capabilities
            .intersection(&config.required_drop_capabilities)
            .next()
            .is_none());
    }

    #[test]
    fn update_is_monotone() {
        let initial = set_with(vec![
            req(
                RequirementKind::Capabilities,
                vec!["NET_BIND_SERVICE".to_string(), "CHOWN".to_string()].into(),
            ),
            req(RequirementKind::HostPath, "/data".into()),
        ]);
        let existing = synthesize("app-scc", &initial).to_resource();

        let next = set_with(vec![req(RequirementKind::Volumes, "nfs".into())]);
        let updated = update(&existing, &next).to_resource();

        for cap in &existing.allowed_capabilities {
            assert!(updated.allowed_capabilities.contains(cap));
        }
        for vol in &existing.volumes {
            assert!(updated.volumes.contains(vol));
        }
        assert!(updated.volumes.contains(&"nfs".to_string()));
        let existing_paths = existing.allowed_host_paths.unwrap();
        let updated_paths = updated.allowed_host_paths.unwrap();
        for path in &existing_paths {
            assert!(updated_paths.contains(path));
        }
    }

    #[test]
    fn update_with_known_capability_changes_nothing() {
        let initial = set_with(vec![req(
            RequirementKind::Capabilities,
            vec!["NET_BIND_SERVICE".to_string(), "CHOWN".to_string()].into(),
        )]);
        let existing = synthesize("app-scc", &initial).to_resource();

        let next = set_with(vec![req(
            RequirementKind::Capabilities,
            vec!["NET_BIND_SERVICE".to_string()].into(),
        )]);
        let updated = update(&existing, &next).to_resource();
        assert_eq!(updated.allowed_capabilities, existing.allowed_capabilities);
    }

    #[test]
    fn optimize_shrinks_to_current_requirements() {
        let generous = set_with(vec![
            req(
                RequirementKind::Capabilities,
                vec!["NET_ADMIN".to_string(), "SYS_TIME".to_string()].into(),
            ),
            req(RequirementKind::Volumes, "nfs".into()),
        ]);
        let mut config = synthesize("app-scc", &generous);

        let current = set_with(vec![req(
            RequirementKind::Capabilities,
            vec!["NET_ADMIN".to_string()].into(),
        )]);
        optimize(&mut config, &current);

        assert_eq!(
            config.allowed_capabilities,
            ["NET_ADMIN".to_string()].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(!config.allowed_volume_types.contains("nfs"));
        for base in BASE_VOLUME_TYPES {
            assert!(config.allowed_volume_types.contains(*base));
        }
    }

    #[test]
    fn fallback_names_are_stable_and_distinct() {
        let a = fallback_name("manifests/app.yaml");
        let b = fallback_name("manifests/app.yaml");
        let c = fallback_name("manifests/other.yaml");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("scc-app-"));
    }

    /// A cluster stub that knows one service-account → SCC association.
    struct StubCluster {
        bound: HashMap<(String, String), SecurityContextConstraints>,
    }

    impl StubCluster {
        fn with_binding(sa: &str, ns: &str, scc_name: &str) -> Self {
            let mut bound = HashMap::new();
            bound.insert(
                (sa.to_string(), ns.to_string()),
                SecurityContextConstraints::new(scc_name),
            );
            Self { bound }
        }
    }

    #[async_trait::async_trait]
    impl ClusterApi for StubCluster {
        async fn get_scc(&self, _: &str) -> Result<Option<SecurityContextConstraints>> {
            Ok(None)
        }
        async fn create_scc(&self, _: &SecurityContextConstraints) -> Result<()> {
            Ok(())
        }
        async fn replace_scc(&self, _: &SecurityContextConstraints) -> Result<()> {
            Ok(())
        }
        async fn delete_scc(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn list_sccs(&self) -> Result<Vec<SecurityContextConstraints>> {
            Ok(self.bound.values().cloned().collect())
        }
        async fn create_cluster_role(&self, _: &ClusterRole) -> Result<()> {
            Ok(())
        }
        async fn create_role_binding(&self, _: &RoleBinding) -> Result<()> {
            Ok(())
        }
        async fn apply_document(
            &self,
            doc: &serde_json::Value,
            _: Option<&str>,
            _: bool,
        ) -> DeploymentOutcome {
            DeploymentOutcome::success(
                scc_agent_k8s_api::manifest::kind_of(doc),
                scc_agent_k8s_api::manifest::name_of(doc),
                "default",
            )
        }
        async fn scc_for_service_account(
            &self,
            name: &str,
            namespace: &str,
        ) -> Result<Option<SecurityContextConstraints>> {
            Ok(self
                .bound
                .get(&(name.to_string(), namespace.to_string()))
                .cloned())
        }
    }

    fn set_with_binding() -> RequirementSet {
        let mut set = set_with(vec![req(RequirementKind::RootUser, 0.into())]);
        set.bind_service_account("runner", "prod", Some("Deployment/app".to_string()));
        set
    }

    #[tokio::test]
    async fn discovered_policy_wins_over_explicit_name() {
        let cluster = StubCluster::with_binding("runner", "prod", "legacy-scc");
        let set = set_with_binding();

        let scc = generate_or_update(&set, Some("operator-choice"), false, Some(&cluster))
            .await
            .unwrap();
        assert_eq!(scc.name(), "legacy-scc");
    }

    #[tokio::test]
    async fn force_new_ignores_discovered_policy() {
        let cluster = StubCluster::with_binding("runner", "prod", "legacy-scc");
        let set = set_with_binding();

        let scc = generate_or_update(&set, Some("operator-choice"), true, Some(&cluster))
            .await
            .unwrap();
        assert_eq!(scc.name(), "operator-choice");
    }

    #[tokio::test]
    async fn explicit_name_wins_over_embedded_policy() {
        let mut set = set_with(vec![req(RequirementKind::RootUser, 0.into())]);
        set.documents.push(serde_json::json!({
            "apiVersion": "security.openshift.io/v1",
            "kind": "SecurityContextConstraints",
            "metadata": {"name": "embedded-scc"},
        }));

        let scc = generate_or_update(&set, Some("operator-choice"), false, None)
            .await
            .unwrap();
        assert_eq!(scc.name(), "operator-choice");
    }

    #[tokio::test]
    async fn embedded_policy_is_the_update_target_without_explicit_name() {
        let mut set = set_with(vec![req(
            RequirementKind::Capabilities,
            vec!["CHOWN".to_string()].into(),
        )]);
        set.documents.push(serde_json::json!({
            "apiVersion": "security.openshift.io/v1",
            "kind": "SecurityContextConstraints",
            "metadata": {"name": "embedded-scc", "resourceVersion": "12"},
            "allowedCapabilities": ["NET_BIND_SERVICE"],
        }));

        let scc = generate_or_update(&set, None, false, None).await.unwrap();
        assert_eq!(scc.name(), "embedded-scc");
        assert_eq!(scc.metadata.resource_version.as_deref(), Some("12"));
        assert!(scc
            .allowed_capabilities
            .contains(&"NET_BIND_SERVICE".to_string()));
        assert!(scc.allowed_capabilities.contains(&"CHOWN".to_string()));
    }

    #[tokio::test]
    async fn fallback_name_is_used_when_nothing_else_applies() {
        let set = set_with(vec![req(RequirementKind::RootUser, 0.into())]);
        let scc = generate_or_update(&set, None, false, None).await.unwrap();
        assert_eq!(scc.name(), fallback_name("manifests/app.yaml"));
    }
}
