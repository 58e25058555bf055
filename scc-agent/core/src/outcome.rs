use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};

/// Admission-denial phrases that mark a deployment failure as attributable to
/// SCC admission control. Matching is case-insensitive over the raw error
/// text returned by the API server.
pub const SCC_FAILURE_PATTERNS: &[&str] = &[
    "unable to validate against any security context constraint",
    "unable to validate against any pod security policy",
    "pods.*forbidden.*securitycontextconstraints",
    "securitycontextconstraints.*not allowed",
    "runAsUser.*not allowed",
    "runAsGroup.*not allowed",
    "privileged.*not allowed",
    "hostNetwork.*not allowed",
    "hostPID.*not allowed",
    "hostIPC.*not allowed",
    "capabilities.*not allowed",
    "volume.*not allowed",
];

static SCC_FAILURE_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(
        SCC_FAILURE_PATTERNS
            .iter()
            .map(|p| format!("(?i){p}")),
    )
    .expect("SCC failure patterns must compile")
});

/// Returns the catalog patterns matched by an error message.
pub fn match_signatures(error: &str) -> Vec<String> {
    SCC_FAILURE_SET
        .matches(error)
        .into_iter()
        .map(|i| SCC_FAILURE_PATTERNS[i].to_string())
        .collect()
}

/// The result of attempting to realize one resource against the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeploymentOutcome {
    pub success: bool,
    pub resource_name: String,
    pub resource_kind: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scc_signatures: Vec<String>,
}

// === impl DeploymentOutcome ===

impl DeploymentOutcome {
    pub fn success(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            resource_name: name.into(),
            resource_kind: kind.into(),
            namespace: namespace.into(),
            error_message: None,
            scc_signatures: vec![],
        }
    }

    /// Builds a failed outcome, tagging it with any matched SCC signatures.
    pub fn failure(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        let scc_signatures = match_signatures(&error);
        Self {
            success: false,
            resource_name: name.into(),
            resource_kind: kind.into(),
            namespace: namespace.into(),
            error_message: Some(error),
            scc_signatures,
        }
    }

    /// Whether this failure is within the adjustment controller's authority.
    pub fn is_scc_failure(&self) -> bool {
        !self.success && !self.scc_signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_denials_are_tagged() {
        let outcome = DeploymentOutcome::failure(
            "Pod",
            "app",
            "default",
            "pods \"app\" is forbidden: unable to validate against any security context constraint: \
             [provider restricted: .spec.securityContext.hostNetwork: Invalid value: true]",
        );
        assert!(outcome.is_scc_failure());
        assert!(outcome
            .scc_signatures
            .contains(&"unable to validate against any security context constraint".to_string()));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(!match_signatures("PRIVILEGED container is NOT ALLOWED").is_empty());
    }

    #[test]
    fn unrelated_errors_carry_no_signatures() {
        let outcome = DeploymentOutcome::failure(
            "Deployment",
            "app",
            "default",
            "ImagePullBackOff: manifest for app:latest not found",
        );
        assert!(!outcome.is_scc_failure());
        assert!(outcome.scc_signatures.is_empty());
    }

    #[test]
    fn successes_are_never_scc_failures() {
        assert!(!DeploymentOutcome::success("Pod", "app", "default").is_scc_failure());
    }
}
