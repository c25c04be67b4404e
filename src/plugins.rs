//! Plugin discovery primitives
//!
//! Shared by the strategy and adapter loaders. Plugins are YAML metadata
//! records in a directory; discovery parses the files and nothing else, so
//! listing is side-effect-free, and a broken or deleted file never affects
//! its neighbors. Dependencies between plugins resolve by topological
//! sort; a cycle or a missing dependency is a typed error.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// One plugin's metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Locator of the implementation, e.g. `builtin:sma_cross`.
    pub entry: String,
    #[serde(default)]
    pub features: Vec<String>,
    /// Ids of plugins that must be loadable before this one.
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("plugin directory scan failed: {0}")]
    Io(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("unknown entry {entry} for plugin {id}")]
    UnknownEntry { id: String, entry: String },

    #[error("plugin {id} requires missing dependency {requires}")]
    MissingDependency { id: String, requires: String },

    #[error("dependency cycle among plugins: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("plugin construction failed: {0}")]
    Construction(String),
}

impl LoaderError {
    pub fn code(&self) -> &'static str {
        match self {
            LoaderError::Io(_) => "PLUGIN_SCAN_FAILED",
            LoaderError::NotFound(_) => "PLUGIN_NOT_FOUND",
            LoaderError::UnknownEntry { .. } => "UNKNOWN_ENTRY",
            LoaderError::MissingDependency { .. } => "MISSING_DEPENDENCY",
            LoaderError::DependencyCycle(_) => "DEPENDENCY_CYCLE",
            LoaderError::Construction(_) => "PLUGIN_CONSTRUCTION_FAILED",
        }
    }
}

/// Merge builtin records with the directory's records; a directory record
/// overrides a builtin with the same id. The result is sorted by id.
pub fn discover(
    builtins: &[PluginMetadata],
    dir: Option<&Path>,
) -> Result<Vec<PluginMetadata>, LoaderError> {
    let mut by_id: HashMap<String, PluginMetadata> = builtins
        .iter()
        .map(|m| (m.id.clone(), m.clone()))
        .collect();

    if let Some(dir) = dir {
        for metadata in scan_dir(dir)? {
            by_id.insert(metadata.id.clone(), metadata);
        }
    }

    let mut all: Vec<PluginMetadata> = by_id.into_values().collect();
    all.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(all)
}

/// Parse every `*.yaml`/`*.yml` in `dir`. Pure parsing, no execution.
/// Unreadable or malformed files are skipped with a warning.
pub fn scan_dir(dir: &Path) -> Result<Vec<PluginMetadata>, LoaderError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // A missing directory just means no file-based plugins.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LoaderError::Io(e.to_string())),
    };

    let mut out = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!(error = %e, "Unreadable directory entry skipped");
                continue;
            }
        };
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str::<PluginMetadata>(&content) {
                Ok(metadata) => out.push(metadata),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Malformed plugin metadata skipped")
                }
            },
            Err(e) => warn!(file = %path.display(), error = %e, "Unreadable plugin file skipped"),
        }
    }
    Ok(out)
}

/// Dependency-respecting load order over `metas` (Kahn's algorithm).
pub fn resolve_order(metas: &[PluginMetadata]) -> Result<Vec<String>, LoaderError> {
    let ids: HashSet<&str> = metas.iter().map(|m| m.id.as_str()).collect();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for meta in metas {
        indegree.entry(meta.id.as_str()).or_insert(0);
        for dep in &meta.requires {
            if !ids.contains(dep.as_str()) {
                return Err(LoaderError::MissingDependency {
                    id: meta.id.clone(),
                    requires: dep.clone(),
                });
            }
            *indegree.entry(meta.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(meta.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = {
        let mut roots: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        roots.sort_unstable();
        roots.into()
    };

    let mut order = Vec::with_capacity(metas.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            let d = indegree.get_mut(dependent).expect("dependent is tracked");
            *d -= 1;
            if *d == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != metas.len() {
        let mut remaining: Vec<String> = indegree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        remaining.sort_unstable();
        return Err(LoaderError::DependencyCycle(remaining));
    }
    Ok(order)
}
