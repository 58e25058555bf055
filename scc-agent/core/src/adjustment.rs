use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Adjustments below this confidence are dropped, never queued.
pub const MIN_CONFIDENCE: f64 = 0.7;

/// One oracle-proposed edit to the serialized policy.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Adjustment {
    /// Dot-separated path into the serialized policy, e.g. `runAsUser.type`.
    pub field: String,
    #[serde(default)]
    pub current_value: Value,
    pub suggested_value: Value,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub impact: Impact,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    #[default]
    Medium,
    High,
}

/// A structured oracle analysis of one deployment failure.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Analysis {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_analysis: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub suggested_adjustments: Vec<Adjustment>,
    #[serde(default)]
    pub alternative_approaches: Vec<String>,
    #[serde(default)]
    pub security_implications: Vec<String>,
    #[serde(default)]
    pub confidence_score: f64,
}

fn default_confidence() -> f64 {
    0.5
}

// === impl Analysis ===

impl Analysis {
    /// The degraded analysis substituted when the oracle fails or returns
    /// something unparseable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error_analysis: reason.into(),
            confidence_score: 0.0,
            ..Default::default()
        }
    }
}

/// Applies every adjustment at or above the confidence floor to the
/// serialized policy, returning the adjustments that were applied.
/// Sub-threshold adjustments are dropped silently.
pub fn apply_adjustments(policy: &mut Value, adjustments: &[Adjustment]) -> Vec<Adjustment> {
    let mut applied = Vec::new();
    for adjustment in adjustments {
        if adjustment.confidence < MIN_CONFIDENCE {
            debug!(
                field = %adjustment.field,
                confidence = adjustment.confidence,
                "dropping low-confidence adjustment"
            );
            continue;
        }
        set_field(policy, &adjustment.field, adjustment.suggested_value.clone());
        info!(
            field = %adjustment.field,
            value = %adjustment.suggested_value,
            "applied adjustment"
        );
        applied.push(adjustment.clone());
    }
    applied
}

/// Sets a leaf value by dot-path, creating intermediate objects as needed.
/// A non-object value in the middle of the path is replaced by an object.
fn set_field(root: &mut Value, path: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().expect("split yields at least one segment");

    let target = segments.into_iter().fold(root, |node, part| {
        let map = match node {
            Value::Object(map) => map,
            _ => unreachable!("intermediate nodes are coerced to objects"),
        };
        let next = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            *next = Value::Object(Map::new());
        }
        next
    });
    if let Value::Object(map) = target {
        map.insert(leaf.to_string(), value);
    }
}
