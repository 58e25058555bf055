//! Requirement extraction over Kubernetes/OpenShift manifests.
//!
//! Extraction is a pure function over its input:
//!
//! - Each workload resource's pod template is located by kind and walked in a
//!   fixed order (containers, then init containers, then pod scope). Every
//!   privilege signal becomes one `Requirement`; nothing is deduplicated here
//!   because the synthesis engine's rule table already folds with set-union
//!   semantics.
//! - Non-workload kinds contribute service-account and namespace derivations
//!   only; unsupported kinds are recorded as warnings, never errors.
//! - A document that fails to decode degrades to an error record on the set,
//!   so one malformed resource can never abort a multi-resource batch.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod analysis;
mod workload;

pub use self::{
    analysis::{analyze_documents, analyze_str, SUPPORTED_KINDS},
    workload::extract_requirements,
};
