use crate::{client::KubeCluster, manifests, oracle::ChatOracle};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scc_agent_core::{
    reconcile::DEFAULT_MAX_ITERATIONS, synth, templates, ClusterApi, ReconcileState, Reconciler,
    RequirementSet,
};
use scc_agent_k8s_api::{rbac, SecurityContextConstraints};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[clap(
    name = "scc-agent",
    about = "Synthesizes and reconciles OpenShift SecurityContextConstraints from workload manifests",
    version
)]
pub struct Args {
    #[clap(long, default_value = "scc_agent=info,warn", env = "SCC_AGENT_LOG")]
    log_level: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze manifests and report the extracted security requirements.
    Analyze {
        path: PathBuf,

        #[clap(long, short = 'f', value_enum, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Generate or update an SCC (plus its RBAC) from manifest analysis.
    Generate {
        path: PathBuf,

        /// Name for the generated SCC. Ignored when an existing bound SCC is
        /// discovered in the cluster.
        #[clap(long, short = 'n')]
        name: Option<String>,

        /// Always create a fresh SCC, ignoring discovered or embedded ones.
        #[clap(long)]
        force_new: bool,

        /// Shrink capability and volume grants to what the manifests justify.
        #[clap(long)]
        optimize: bool,

        /// Only suggest a pre-defined baseline SCC and exit.
        #[clap(long, short = 's')]
        suggest: bool,

        /// Consult the cluster for existing service-account associations.
        #[clap(long)]
        cluster: bool,

        /// Write generated resources here: a directory for one file per
        /// resource, or a file path with --single-file.
        #[clap(long, short = 'o')]
        output: Option<PathBuf>,

        /// Write all resources into one multi-document YAML file.
        #[clap(long)]
        single_file: bool,
    },

    /// Deploy manifests and report a per-resource outcome.
    Deploy {
        path: PathBuf,

        /// Override the target namespace for namespaced resources.
        #[clap(long, short = 'n')]
        namespace: Option<String>,

        /// Server-side dry run; nothing is persisted.
        #[clap(long)]
        dry_run: bool,
    },

    /// Deploy with oracle-assisted SCC adjustment until convergence.
    AutoDeploy {
        path: PathBuf,

        #[clap(long, short = 'n')]
        name: Option<String>,

        #[clap(long)]
        force_new: bool,

        #[clap(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,

        #[clap(
            long,
            default_value = "https://api.openai.com/v1",
            env = "SCC_AGENT_ORACLE_URL"
        )]
        oracle_url: String,

        #[clap(long, default_value = "gpt-4", env = "SCC_AGENT_ORACLE_MODEL")]
        oracle_model: String,

        #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: String,
    },

    /// Fetch one SCC from the cluster.
    GetScc {
        name: String,

        #[clap(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// List the SCCs in the cluster.
    ListSccs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Serialize)]
struct AnalyzeReport {
    #[serde(flatten)]
    summary: scc_agent_core::requirement::RequirementSummary,
    suggested_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedded_scc: Option<String>,
}

// === impl Args ===

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(&self.log_level))
            .with_writer(std::io::stderr)
            .init();

        match self.command {
            Command::Analyze { path, format } => analyze(&path, format),
            Command::Generate {
                path,
                name,
                force_new,
                optimize,
                suggest,
                cluster,
                output,
                single_file,
            } => {
                generate(
                    &path,
                    name.as_deref(),
                    force_new,
                    optimize,
                    suggest,
                    cluster,
                    output.as_deref(),
                    single_file,
                )
                .await
            }
            Command::Deploy {
                path,
                namespace,
                dry_run,
            } => deploy(&path, namespace.as_deref(), dry_run).await,
            Command::AutoDeploy {
                path,
                name,
                force_new,
                max_iterations,
                oracle_url,
                oracle_model,
                api_key,
            } => {
                auto_deploy(
                    &path,
                    name.as_deref(),
                    force_new,
                    max_iterations,
                    &oracle_url,
                    &oracle_model,
                    &api_key,
                )
                .await
            }
            Command::GetScc { name, output } => get_scc(&name, output.as_deref()).await,
            Command::ListSccs => list_sccs().await,
        }
    }
}

fn analyze(path: &Path, format: OutputFormat) -> Result<()> {
    let set = manifests::load_path(path);
    let report = AnalyzeReport {
        summary: set.summary(),
        suggested_template: templates::suggest_template(&set).to_string(),
        embedded_scc: set.embedded_policy().map(|scc| scc.name().to_string()),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    path: &Path,
    name: Option<&str>,
    force_new: bool,
    optimize: bool,
    suggest: bool,
    use_cluster: bool,
    output: Option<&Path>,
    single_file: bool,
) -> Result<()> {
    let set = manifests::load_path(path);

    if suggest {
        let template = templates::suggest_template(&set);
        info!(%template, "suggested pre-defined SCC");
        print!("{}", serde_yaml::to_string(&template.body())?);
        return Ok(());
    }

    let cluster = if use_cluster && !force_new {
        Some(KubeCluster::connect().await?)
    } else {
        None
    };
    let cluster_ref = cluster.as_ref().map(|c| c as &dyn ClusterApi);

    let scc = generate_policy(&set, name, force_new, optimize, cluster_ref).await?;
    info!(name = scc.name(), "generated SCC");

    let role = rbac::cluster_role(scc.name(), scc_agent_core::AGENT_NAME);
    let bindings: Vec<_> = set
        .service_accounts
        .iter()
        .map(|sa| rbac::role_binding(scc.name(), &sa.name, &sa.namespace, scc_agent_core::AGENT_NAME))
        .collect();

    write_generated(&scc, &role, &bindings, output, single_file)
}

/// Resolves identity and synthesizes or updates, with the optional explicit
/// optimize pass.
async fn generate_policy(
    set: &RequirementSet,
    name: Option<&str>,
    force_new: bool,
    optimize: bool,
    cluster: Option<&dyn ClusterApi>,
) -> Result<SecurityContextConstraints> {
    let identity = synth::resolve_identity(set, name, force_new, cluster).await?;
    let mut config = match identity {
        synth::PolicyIdentity::Fresh(name) => synth::synthesize(&name, set),
        synth::PolicyIdentity::Update(existing) => synth::update(&existing, set),
    };
    if optimize {
        synth::optimize(&mut config, set);
    }
    Ok(config.to_resource())
}

fn write_generated(
    scc: &SecurityContextConstraints,
    role: &scc_agent_k8s_api::ClusterRole,
    bindings: &[scc_agent_k8s_api::RoleBinding],
    output: Option<&Path>,
    single_file: bool,
) -> Result<()> {
    let Some(output) = output else {
        print!("{}", serde_yaml::to_string(scc)?);
        print!("---\n{}", serde_yaml::to_string(role)?);
        for binding in bindings {
            print!("---\n{}", serde_yaml::to_string(binding)?);
        }
        return Ok(());
    };

    if single_file {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = serde_yaml::to_string(scc)?;
        contents.push_str("---\n");
        contents.push_str(&serde_yaml::to_string(role)?);
        for binding in bindings {
            contents.push_str("---\n");
            contents.push_str(&serde_yaml::to_string(binding)?);
        }
        std::fs::write(output, contents)
            .with_context(|| format!("failed to write {}", output.display()))?;
        info!(path = %output.display(), resources = 2 + bindings.len(), "wrote RBAC bundle");
        return Ok(());
    }

    std::fs::create_dir_all(output)?;
    let base = scc.name();
    let write_file = |file: PathBuf, contents: String| -> Result<()> {
        std::fs::write(&file, contents)
            .with_context(|| format!("failed to write {}", file.display()))?;
        info!(path = %file.display(), "wrote resource");
        Ok(())
    };
    write_file(
        output.join(format!("{base}-scc.yaml")),
        serde_yaml::to_string(scc)?,
    )?;
    write_file(
        output.join(format!("{base}-clusterrole.yaml")),
        serde_yaml::to_string(role)?,
    )?;
    for binding in bindings {
        let subject = binding
            .subjects
            .as_ref()
            .and_then(|subjects| subjects.first())
            .map(|subject| subject.name.as_str())
            .unwrap_or("subject");
        let namespace = binding.metadata.namespace.as_deref().unwrap_or("default");
        write_file(
            output.join(format!("{base}-rolebinding-{subject}-{namespace}.yaml")),
            serde_yaml::to_string(binding)?,
        )?;
    }
    Ok(())
}

async fn deploy(path: &Path, namespace: Option<&str>, dry_run: bool) -> Result<()> {
    let set = manifests::load_path(path);
    if set.documents.is_empty() {
        bail!("no deployable resources found under {}", path.display());
    }
    let cluster = KubeCluster::connect().await?;

    let mut documents = set.documents.clone();
    scc_agent_k8s_api::manifest::sort_for_apply(&mut documents);

    let mut failed = 0usize;
    for doc in &documents {
        let outcome = cluster.apply_document(doc, namespace, dry_run).await;
        if outcome.success {
            println!(
                "ok    {}/{} ({})",
                outcome.resource_kind, outcome.resource_name, outcome.namespace
            );
        } else {
            failed += 1;
            println!(
                "fail  {}/{} ({}): {}",
                outcome.resource_kind,
                outcome.resource_name,
                outcome.namespace,
                outcome.error_message.as_deref().unwrap_or("unknown error"),
            );
            if outcome.is_scc_failure() {
                println!(
                    "      admission signatures: {}",
                    outcome.scc_signatures.join("; ")
                );
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} resources failed to deploy", documents.len());
    }
    Ok(())
}

async fn auto_deploy(
    path: &Path,
    name: Option<&str>,
    force_new: bool,
    max_iterations: usize,
    oracle_url: &str,
    oracle_model: &str,
    api_key: &str,
) -> Result<()> {
    let set = manifests::load_path(path);
    if set.documents.is_empty() {
        bail!("no deployable resources found under {}", path.display());
    }

    let cluster = KubeCluster::connect().await?;
    let oracle = ChatOracle::new(oracle_url, oracle_model, api_key);

    let scc = synth::generate_or_update(&set, name, force_new, Some(&cluster)).await?;
    info!(name = scc.name(), "prepared SCC");
    cluster.create_scc(&scc).await?;

    cluster
        .create_cluster_role(&rbac::cluster_role(scc.name(), scc_agent_core::AGENT_NAME))
        .await?;
    for sa in &set.service_accounts {
        cluster
            .create_role_binding(&rbac::role_binding(
                scc.name(),
                &sa.name,
                &sa.namespace,
                scc_agent_core::AGENT_NAME,
            ))
            .await?;
    }

    let report = Reconciler::new(&cluster, &oracle)
        .with_max_iterations(max_iterations)
        .run(&set, &scc)
        .await?;

    println!(
        "reconcile finished: {} after {} iteration(s), {} adjustment(s) applied",
        report.state,
        report.iterations,
        report.applied.len()
    );
    for adjustment in &report.applied {
        println!(
            "  {} -> {} (confidence {:.2}: {})",
            adjustment.field, adjustment.suggested_value, adjustment.confidence, adjustment.reason
        );
    }
    if let Some(reason) = &report.reason {
        warn!(%reason, "run did not converge");
    }
    for outcome in &report.outcomes {
        if !outcome.success {
            println!(
                "  unresolved: {}/{} ({})",
                outcome.resource_kind, outcome.resource_name, outcome.namespace
            );
        }
    }

    match report.state {
        ReconcileState::Converged => Ok(()),
        state => bail!("reconciliation ended in the {state} state"),
    }
}

async fn get_scc(name: &str, output: Option<&Path>) -> Result<()> {
    let cluster = KubeCluster::connect().await?;
    let Some(scc) = cluster.get_scc(name).await? else {
        bail!("SCC {name} not found");
    };
    let rendered = serde_yaml::to_string(&scc)?;
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

async fn list_sccs() -> Result<()> {
    let cluster = KubeCluster::connect().await?;
    for scc in cluster.list_sccs().await? {
        println!(
            "{}\tpriority={}\tprivileged={}\thostNetwork={}\trunAsUser={}",
            scc.name(),
            scc.priority.map_or("-".to_string(), |p| p.to_string()),
            scc.allow_privileged_container,
            scc.allow_host_network,
            scc.run_as_user
                .as_ref()
                .map_or("-".to_string(), |s| s.strategy.to_string()),
        );
    }
    Ok(())
}
