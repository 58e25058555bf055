use crate::{
    adjustment::Analysis,
    outcome::DeploymentOutcome,
    requirement::{RequirementKind, RequirementSet, RequirementValue, ServiceAccountBinding, Severity},
};
use anyhow::Result;
use serde::Serialize;

/// Everything the oracle sees about one deployment failure.
#[derive(Clone, Debug, Serialize)]
pub struct FailureContext {
    pub failure: DeploymentOutcome,
    pub current_policy: serde_json::Value,
    pub requirements: Vec<RequirementEntry>,
    pub service_accounts: Vec<ServiceAccountBinding>,
    pub namespaces: Vec<String>,
    pub summary: ContextSummary,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequirementEntry {
    #[serde(rename = "type")]
    pub kind: RequirementKind,
    pub value: RequirementValue,
    pub severity: Severity,
    pub context: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ContextSummary {
    pub total_resources: usize,
    pub total_requirements: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// An advisory service that proposes policy edits for a deployment failure.
///
/// The oracle is untrusted and non-deterministic; callers gate every proposed
/// adjustment on its confidence and treat errors as "no adjustments".
#[async_trait::async_trait]
pub trait Oracle: Send + Sync {
    async fn propose(&self, context: &FailureContext) -> Result<Analysis>;
}

// === impl FailureContext ===

impl FailureContext {
    pub fn new(
        failure: &DeploymentOutcome,
        current_policy: &serde_json::Value,
        set: &RequirementSet,
    ) -> Self {
        let requirements = set
            .requirements
            .iter()
            .map(|req| RequirementEntry {
                kind: req.kind,
                value: req.value.clone(),
                severity: req.severity(),
                context: req.origin.context.clone(),
            })
            .collect();
        Self {
            failure: failure.clone(),
            current_policy: current_policy.clone(),
            requirements,
            service_accounts: set.service_accounts.clone(),
            namespaces: set.namespaces.iter().cloned().collect(),
            summary: ContextSummary {
                total_resources: set.documents.len(),
                total_requirements: set.requirements.len(),
                errors: set.errors.clone(),
                warnings: set.warnings.clone(),
            },
        }
    }
}
