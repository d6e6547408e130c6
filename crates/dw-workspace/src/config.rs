// config.rs — Workspace-global and per-clone configuration documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;
use crate::layout::Layout;
use crate::store;

/// Version of the on-disk metadata format. Bumped on incompatible change.
pub const FORMAT_VERSION: u32 = 1;

/// Default results-directory template; see the rotation engine for the
/// full variable list.
pub const DEFAULT_RESULTS_DIR_TEMPLATE: &str = "snapshots/{HOSTNAME}-{TAG}";

/// `config.json` — shared across all clones, committed to the workspace
/// repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub format_version: u32,
    /// Human name of the workspace.
    pub name: String,
    /// Template for per-snapshot results subtrees.
    #[serde(default = "default_template")]
    pub results_dir_template: String,
    /// Free-form global parameters, captured into every snapshot manifest.
    #[serde(default)]
    pub global_params: BTreeMap<String, serde_json::Value>,
}

fn default_template() -> String {
    DEFAULT_RESULTS_DIR_TEMPLATE.to_string()
}

impl WorkspaceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            name: name.into(),
            results_dir_template: default_template(),
            global_params: BTreeMap::new(),
        }
    }

    pub fn load(layout: &Layout) -> Result<Self, WorkspaceError> {
        let config: Self = store::read_json(&layout.config_file())?;
        if config.format_version != FORMAT_VERSION {
            return Err(WorkspaceError::SchemaVersion {
                found: config.format_version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(config)
    }

    pub fn save(&self, layout: &Layout) -> Result<(), WorkspaceError> {
        store::write_json_atomic(&layout.config_file(), self)
    }
}

/// `local_params.json` — per-clone state, never committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Hostname recorded at init/clone time; scopes tags and appears in
    /// history entries.
    pub hostname: String,
}

impl LocalConfig {
    pub fn load(layout: &Layout) -> Result<Self, WorkspaceError> {
        store::read_json(&layout.local_params_file())
    }

    pub fn save(&self, layout: &Layout) -> Result<(), WorkspaceError> {
        store::write_json_atomic(&layout.local_params_file(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trip_and_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create_skeleton().unwrap();

        let config = WorkspaceConfig::new("experiments");
        config.save(&layout).unwrap();
        let loaded = WorkspaceConfig::load(&layout).unwrap();
        assert_eq!(loaded.name, "experiments");
        assert_eq!(loaded.results_dir_template, DEFAULT_RESULTS_DIR_TEMPLATE);

        // A future format version is refused.
        let mut bad = config.clone();
        bad.format_version = FORMAT_VERSION + 1;
        bad.save(&layout).unwrap();
        assert!(matches!(
            WorkspaceConfig::load(&layout),
            Err(WorkspaceError::SchemaVersion { .. })
        ));
    }
}
