// catalogue.rs — The shared resource catalogue and per-clone local params.
//
// `resources.json` is an ordered array of resource configurations; the
// order is the processing order for every engine operation. Backend
// configuration is a tagged enum so new backends extend the tag set
// instead of growing an untyped parameter bag.
//
// Mutation goes through `CatalogueTransaction`: changes are staged and
// validated in memory, then both documents are written once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;
use crate::layout::Layout;
use crate::store;

/// What a resource is for. Restore treats `results` specially: those
/// resources are never reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    SourceData,
    IntermediateData,
    Code,
    Results,
}

impl Role {
    pub fn is_results(self) -> bool {
        matches!(self, Role::Results)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SourceData => "source-data",
            Role::IntermediateData => "intermediate-data",
            Role::Code => "code",
            Role::Results => "results",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of an external-sync resource is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// The remote is the master copy; restore re-syncs from it.
    #[default]
    RemoteIsMaster,
    /// The local directory is the master copy; restore uses snapshot blobs.
    LocalIsMaster,
}

/// How the external tool transfers: `copy` never deletes on the receiving
/// side, `sync` mirrors deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Copy,
    Sync,
}

/// Backend-specific shared parameters, tagged by backend kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// A git repository managed by the tool (its own history and remote).
    GitRepo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    /// A subdirectory of the workspace's own git repository.
    GitSubdir { subpath: String },
    /// A locally managed directory with no remote of its own.
    LocalFiles {},
    /// A directory mirrored to a remote by an external sync utility.
    ExternalSync {
        /// `remote:path` spec understood by the sync tool.
        remote: String,
        #[serde(default)]
        direction: SyncDirection,
        /// Per-resource override of the tool's config file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config_path: Option<String>,
        /// Hash file contents when comparing against the remote
        /// (otherwise size-only).
        #[serde(default)]
        compute_hash: bool,
        #[serde(default)]
        mode: SyncMode,
    },
    /// An object-store bucket with server-side versioning.
    ObjectStore {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::GitRepo { .. } => "git",
            BackendConfig::GitSubdir { .. } => "git-subdir",
            BackendConfig::LocalFiles {} => "file",
            BackendConfig::ExternalSync { .. } => "sync",
            BackendConfig::ObjectStore { .. } => "bucket",
        }
    }
}

/// One catalogue entry: the shared configuration of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub role: Role,
    /// Read-only resources are never written by restore and never pushed.
    #[serde(default)]
    pub read_only: bool,
    #[serde(flatten)]
    pub backend: BackendConfig,
}

/// Per-clone parameters of a resource (`resource_local_params.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLocalParams {
    /// Where the resource lives on this clone's disk, if it has a local
    /// materialisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

pub type LocalParamsMap = BTreeMap<String, ResourceLocalParams>;

/// The ordered resource catalogue.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    resources: Vec<ResourceConfig>,
}

impl Catalogue {
    pub fn load(layout: &Layout) -> Result<Self, WorkspaceError> {
        let resources: Vec<ResourceConfig> = store::read_json(&layout.resources_file())?;
        Ok(Self { resources })
    }

    pub fn save(&self, layout: &Layout) -> Result<(), WorkspaceError> {
        store::write_json_atomic(&layout.resources_file(), &self.resources)
    }

    pub fn load_local_params(layout: &Layout) -> Result<LocalParamsMap, WorkspaceError> {
        let path = layout.resource_local_params_file();
        if !path.exists() {
            return Ok(LocalParamsMap::new());
        }
        store::read_json(&path)
    }

    pub fn save_local_params(
        layout: &Layout,
        params: &LocalParamsMap,
    ) -> Result<(), WorkspaceError> {
        store::write_json_atomic(&layout.resource_local_params_file(), params)
    }

    /// Resources in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.resources.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Result<&ResourceConfig, WorkspaceError> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| WorkspaceError::UnknownResource {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.iter().any(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Start a transactional batch of catalogue mutations.
    pub fn transaction<'a>(
        &'a mut self,
        local_params: &'a mut LocalParamsMap,
    ) -> CatalogueTransaction<'a> {
        CatalogueTransaction {
            catalogue: self,
            local_params,
            staged: Vec::new(),
        }
    }
}

enum StagedChange {
    Add {
        config: ResourceConfig,
        local: ResourceLocalParams,
    },
    SetLocalParams {
        name: String,
        local: ResourceLocalParams,
    },
}

/// A staged batch of catalogue edits. Nothing touches disk until
/// [`CatalogueTransaction::commit`]; validation happens at staging time so
/// a bad add aborts before anything is written.
pub struct CatalogueTransaction<'a> {
    catalogue: &'a mut Catalogue,
    local_params: &'a mut LocalParamsMap,
    staged: Vec<StagedChange>,
}

impl<'a> CatalogueTransaction<'a> {
    pub fn add_resource(
        &mut self,
        config: ResourceConfig,
        local: ResourceLocalParams,
    ) -> Result<(), WorkspaceError> {
        validate_name(&config.name)?;
        if self.catalogue.contains(&config.name) || self.staged_contains(&config.name) {
            return Err(WorkspaceError::DuplicateResource {
                name: config.name.clone(),
            });
        }
        if let Some(path) = &local.local_path {
            self.check_overlap(&config.name, path)?;
        }
        self.staged.push(StagedChange::Add { config, local });
        Ok(())
    }

    /// Record local parameters for a resource that exists in the shared
    /// catalogue but has not been materialised on this clone yet.
    pub fn set_local_params(
        &mut self,
        name: &str,
        local: ResourceLocalParams,
    ) -> Result<(), WorkspaceError> {
        if !self.catalogue.contains(name) && !self.staged_contains(name) {
            return Err(WorkspaceError::UnknownResource {
                name: name.to_string(),
            });
        }
        if let Some(path) = &local.local_path {
            self.check_overlap(name, path)?;
        }
        self.staged.push(StagedChange::SetLocalParams {
            name: name.to_string(),
            local,
        });
        Ok(())
    }

    /// Apply the staged changes in memory and write both documents.
    pub fn commit(self, layout: &Layout) -> Result<(), WorkspaceError> {
        for change in self.staged {
            match change {
                StagedChange::Add { config, local } => {
                    self.local_params.insert(config.name.clone(), local);
                    self.catalogue.resources.push(config);
                }
                StagedChange::SetLocalParams { name, local } => {
                    self.local_params.insert(name, local);
                }
            }
        }
        self.catalogue.save(layout)?;
        Catalogue::save_local_params(layout, self.local_params)
    }

    fn staged_contains(&self, name: &str) -> bool {
        self.staged.iter().any(|c| match c {
            StagedChange::Add { config, .. } => config.name == name,
            StagedChange::SetLocalParams { .. } => false,
        })
    }

    fn check_overlap(&self, name: &str, path: &Path) -> Result<(), WorkspaceError> {
        let candidate = normalize(path);
        let mut all: Vec<(&str, &ResourceLocalParams)> = self
            .local_params
            .iter()
            .map(|(n, p)| (n.as_str(), p))
            .collect();
        for change in &self.staged {
            if let StagedChange::Add { config, local } = change {
                all.push((config.name.as_str(), local));
            }
        }
        for (other_name, other) in all {
            if other_name == name {
                continue;
            }
            let Some(other_path) = &other.local_path else {
                continue;
            };
            let other_norm = normalize(other_path);
            if candidate == other_norm
                || candidate.starts_with(&other_norm)
                || other_norm.starts_with(&candidate)
            {
                return Err(WorkspaceError::PathOverlap {
                    a_name: name.to_string(),
                    a_path: path.to_path_buf(),
                    b_name: other_name.to_string(),
                    b_path: other_path.clone(),
                });
            }
        }
        Ok(())
    }
}

fn normalize(path: &Path) -> PathBuf {
    // Resolve to an absolute form when possible so containment checks are
    // not fooled by `./` segments. Canonicalize needs the path to exist;
    // fall back to the raw path for not-yet-created targets.
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn validate_name(name: &str) -> Result<(), WorkspaceError> {
    let bad = |reason: &str| WorkspaceError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(bad("name is empty"));
    }
    if name.starts_with('.') {
        return Err(bad("name may not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(bad("only alphanumerics, '-', '_' and '.' are allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_config(name: &str, role: Role) -> ResourceConfig {
        ResourceConfig {
            name: name.to_string(),
            role,
            read_only: false,
            backend: BackendConfig::GitRepo {
                remote_url: None,
                branch: None,
            },
        }
    }

    fn local_at(path: &Path) -> ResourceLocalParams {
        ResourceLocalParams {
            local_path: Some(path.to_path_buf()),
        }
    }

    #[test]
    fn backend_config_json_shape() {
        let config = ResourceConfig {
            name: "raw".into(),
            role: Role::SourceData,
            read_only: true,
            backend: BackendConfig::ExternalSync {
                remote: "lab:/data/raw".into(),
                direction: SyncDirection::RemoteIsMaster,
                config_path: None,
                compute_hash: false,
                mode: SyncMode::Copy,
            },
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "external_sync");
        assert_eq!(json["role"], "source-data");
        assert_eq!(json["direction"], "remote_is_master");
        let back: ResourceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn transaction_commits_once_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create_skeleton().unwrap();

        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        let mut catalogue = Catalogue::default();
        let mut params = LocalParamsMap::new();
        let mut txn = catalogue.transaction(&mut params);
        txn.add_resource(git_config("code", Role::Code), local_at(&a))
            .unwrap();
        txn.add_resource(git_config("results", Role::Results), local_at(&b))
            .unwrap();
        // Duplicate name refused at staging time.
        assert!(matches!(
            txn.add_resource(git_config("code", Role::Code), local_at(&b)),
            Err(WorkspaceError::DuplicateResource { .. })
        ));
        txn.commit(&layout).unwrap();

        let loaded = Catalogue::load(&layout).unwrap();
        assert_eq!(loaded.names(), vec!["code", "results"]);
        let loaded_params = Catalogue::load_local_params(&layout).unwrap();
        assert_eq!(loaded_params.len(), 2);
    }

    #[test]
    fn overlapping_paths_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("data");
        let nested = a.join("inner");
        std::fs::create_dir_all(&nested).unwrap();

        let mut catalogue = Catalogue::default();
        let mut params = LocalParamsMap::new();
        let mut txn = catalogue.transaction(&mut params);
        txn.add_resource(git_config("outer", Role::SourceData), local_at(&a))
            .unwrap();
        assert!(matches!(
            txn.add_resource(git_config("inner", Role::SourceData), local_at(&nested)),
            Err(WorkspaceError::PathOverlap { .. })
        ));
    }

    #[test]
    fn bad_names_are_refused() {
        let mut catalogue = Catalogue::default();
        let mut params = LocalParamsMap::new();
        let mut txn = catalogue.transaction(&mut params);
        for bad in ["", ".hidden", "has/slash", "has space"] {
            assert!(matches!(
                txn.add_resource(git_config(bad, Role::Code), ResourceLocalParams::default()),
                Err(WorkspaceError::InvalidName { .. })
            ));
        }
    }
}
