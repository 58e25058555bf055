use scc_agent_core::RequirementSet;
use scc_agent_k8s_extract::analyze_str;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Analyzes a manifest file, or every `.yaml`/`.yml` file under a directory.
/// I/O and parse problems degrade to error records on the returned set.
pub fn load_path(path: &Path) -> RequirementSet {
    if path.is_file() {
        return load_file(path);
    }

    let mut sets = Vec::new();
    for entry in WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_yaml = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if is_yaml {
            sets.push(load_file(entry.path()));
        }
    }
    debug!(path = %path.display(), files = sets.len(), "analyzed manifest directory");
    let mut merged = RequirementSet::merge(sets);
    merged.source = path.display().to_string();
    merged
}

fn load_file(path: &Path) -> RequirementSet {
    let source = path.display().to_string();
    match std::fs::read_to_string(path) {
        Ok(contents) => analyze_str(&source, &contents),
        Err(error) => {
            let mut set = RequirementSet::new(&source);
            set.errors.push(format!("failed to read {source}: {error}"));
            set
        }
    }
}
