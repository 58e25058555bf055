//! The iterative adjustment controller: deploy, classify failures, consult
//! the oracle, apply confidence-gated edits, and loop until convergence or a
//! bounded number of attempts.

use crate::{
    adjustment::{apply_adjustments, Adjustment, Analysis},
    cluster::ClusterApi,
    oracle::{FailureContext, Oracle},
    outcome::DeploymentOutcome,
    requirement::RequirementSet,
};
use anyhow::Result;
use scc_agent_k8s_api::{manifest, SecurityContextConstraints};
use std::fmt;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// Controller phases. A run moves `Idle → Deploying → Evaluating` and then
/// either terminates (`Converged`, `Aborted`) or passes through `Adjusting`
/// back to `Deploying`; `Exhausted` marks the iteration cap being reached
/// without convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileState {
    Idle,
    Deploying,
    Evaluating,
    Adjusting,
    Converged,
    Aborted,
    Exhausted,
}

/// The terminal record of one controller run.
#[derive(Clone, Debug)]
pub struct ReconcileReport {
    pub state: ReconcileState,
    /// Deploy passes performed.
    pub iterations: usize,
    /// Outcomes of the final deploy pass.
    pub outcomes: Vec<DeploymentOutcome>,
    /// Every adjustment applied across all iterations, in order.
    pub applied: Vec<Adjustment>,
    /// Why the run aborted, when it did.
    pub reason: Option<String>,
}

/// Drives the deploy → diagnose → adjust cycle for one policy.
///
/// The run exclusively owns its working copy of the policy; each accepted
/// adjustment replaces that copy before the next deploy pass.
pub struct Reconciler<'a> {
    cluster: &'a dyn ClusterApi,
    oracle: &'a dyn Oracle,
    max_iterations: usize,
}

// === impl Reconciler ===

impl<'a> Reconciler<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, oracle: &'a dyn Oracle) -> Self {
        Self {
            cluster,
            oracle,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub async fn run(
        &self,
        set: &RequirementSet,
        initial_policy: &SecurityContextConstraints,
    ) -> Result<ReconcileReport> {
        let mut policy = serde_json::to_value(initial_policy)?;
        let mut applied = Vec::new();
        let mut outcomes = Vec::new();

        let mut documents = set.documents.clone();
        manifest::sort_for_apply(&mut documents);

        for iteration in 1..=self.max_iterations {
            debug!(iteration, phase = %ReconcileState::Deploying, "starting deploy pass");
            outcomes = self.deploy_all(&documents).await;

            debug!(iteration, phase = %ReconcileState::Evaluating, "classifying outcomes");
            let failures: Vec<&DeploymentOutcome> =
                outcomes.iter().filter(|o| !o.success).collect();
            if failures.is_empty() {
                info!(iteration, "all resources deployed");
                return Ok(self.report(ReconcileState::Converged, iteration, outcomes, applied, None));
            }

            let scc_failures: Vec<&DeploymentOutcome> = failures
                .iter()
                .copied()
                .filter(|o| o.is_scc_failure())
                .collect();
            if scc_failures.is_empty() {
                warn!(
                    iteration,
                    failures = failures.len(),
                    "remaining failures are not admission-control related"
                );
                return Ok(self.report(
                    ReconcileState::Aborted,
                    iteration,
                    outcomes,
                    applied,
                    Some("remaining failures are not attributable to the SCC".to_string()),
                ));
            }

            debug!(iteration, phase = %ReconcileState::Adjusting, "consulting the oracle");
            let context = FailureContext::new(scc_failures[0], &policy, set);
            let analysis = match self.oracle.propose(&context).await {
                Ok(analysis) => analysis,
                Err(error) => {
                    warn!(%error, "oracle call failed");
                    Analysis::unavailable(error.to_string())
                }
            };

            if !analysis.success || analysis.suggested_adjustments.is_empty() {
                return Ok(self.report(
                    ReconcileState::Aborted,
                    iteration,
                    outcomes,
                    applied,
                    Some("oracle provided no usable adjustments".to_string()),
                ));
            }

            let accepted = apply_adjustments(&mut policy, &analysis.suggested_adjustments);
            if accepted.is_empty() {
                info!(iteration, "every suggested adjustment fell below the confidence floor");
            }
            applied.extend(accepted);

            let updated: SecurityContextConstraints = match serde_json::from_value(policy.clone()) {
                Ok(updated) => updated,
                Err(error) => {
                    return Ok(self.report(
                        ReconcileState::Aborted,
                        iteration,
                        outcomes,
                        applied,
                        Some(format!("adjusted policy is no longer a valid SCC: {error}")),
                    ));
                }
            };
            if let Err(error) = self.cluster.replace_scc(&updated).await {
                return Ok(self.report(
                    ReconcileState::Aborted,
                    iteration,
                    outcomes,
                    applied,
                    Some(format!("failed to persist adjusted policy: {error}")),
                ));
            }
        }

        warn!(max_iterations = self.max_iterations, "iteration cap reached without convergence");
        Ok(self.report(
            ReconcileState::Exhausted,
            self.max_iterations,
            outcomes,
            applied,
            None,
        ))
    }

    /// One full deploy pass: every resource is attempted, failures included.
    async fn deploy_all(&self, documents: &[serde_json::Value]) -> Vec<DeploymentOutcome> {
        let mut outcomes = Vec::with_capacity(documents.len());
        for doc in documents {
            let outcome = self.cluster.apply_document(doc, None, false).await;
            if !outcome.success {
                debug!(
                    kind = %outcome.resource_kind,
                    name = %outcome.resource_name,
                    "resource failed to deploy"
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    fn report(
        &self,
        state: ReconcileState,
        iterations: usize,
        outcomes: Vec<DeploymentOutcome>,
        applied: Vec<Adjustment>,
        reason: Option<String>,
    ) -> ReconcileReport {
        ReconcileReport {
            state,
            iterations,
            outcomes,
            applied,
            reason,
        }
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => "idle".fmt(f),
            Self::Deploying => "deploying".fmt(f),
            Self::Evaluating => "evaluating".fmt(f),
            Self::Adjusting => "adjusting".fmt(f),
            Self::Converged => "converged".fmt(f),
            Self::Aborted => "aborted".fmt(f),
            Self::Exhausted => "exhausted".fmt(f),
        }
    }
}
