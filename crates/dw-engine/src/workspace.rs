// workspace.rs — The live workspace handle.
//
// Everything an engine operation needs, loaded once: configuration, the
// catalogue with one built adaptor per resource, the lineage working set,
// the hostname, and the git runner for the workspace's own metadata
// repository. The advisory lock is held for the handle's lifetime.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use dw_lineage::{LineageRef, LineageStore};
use dw_resources::{build_adaptor, GitRunner, ResourceAdaptor, ResourceError};
use dw_workspace::{
    Catalogue, Layout, LocalConfig, LocalParamsMap, ResourceConfig, ResourceLocalParams,
    SnapshotHistory, WorkspaceConfig, WorkspaceLock,
};

use crate::error::EngineError;
use crate::template;

pub struct Workspace {
    layout: Layout,
    config: WorkspaceConfig,
    local: LocalConfig,
    catalogue: Catalogue,
    local_params: LocalParamsMap,
    adaptors: BTreeMap<String, Box<dyn ResourceAdaptor>>,
    lineage: LineageStore,
    vcs: GitRunner,
    pub batch: bool,
    pub verbose: bool,
    _lock: WorkspaceLock,
}

impl Workspace {
    /// Create a new workspace at `root`: metadata skeleton, empty
    /// catalogue, git repository (if the root is not already one), and an
    /// initial metadata commit.
    pub fn init(root: &Path, name: &str, hostname: Option<String>) -> Result<(), EngineError> {
        let layout = Layout::new(root);
        if layout.is_initialized() {
            return Err(EngineError::user(format!(
                "{} is already a workspace",
                root.display()
            )));
        }
        std::fs::create_dir_all(root).map_err(|e| EngineError::System {
            message: format!("cannot create {}: {}", root.display(), e),
        })?;
        layout.create_skeleton()?;

        let config = WorkspaceConfig::new(name);
        template::validate_template(&config.results_dir_template)?;
        config.save(&layout)?;
        let local = LocalConfig {
            hostname: hostname.unwrap_or_else(system_hostname),
        };
        local.save(&layout)?;
        Catalogue::default().save(&layout)?;
        Catalogue::save_local_params(&layout, &LocalParamsMap::new())?;
        SnapshotHistory::default().save(&layout)?;

        let vcs = GitRunner::new(root);
        if !vcs.is_repo().map_err(system_err)? {
            vcs.init().map_err(system_err)?;
        }
        vcs.commit_paths(&[dw_workspace::layout::METADATA_DIR], "Initialize workspace")
            .map_err(system_err)?;
        info!(workspace = name, root = %root.display(), "initialized");
        Ok(())
    }

    /// Open the workspace containing `start`, acquiring the lock.
    pub fn open(start: &Path, batch: bool, verbose: bool) -> Result<Self, EngineError> {
        let layout = Layout::find_from(start)?;
        let config = WorkspaceConfig::load(&layout)?;
        let local = LocalConfig::load(&layout)?;
        let catalogue = Catalogue::load(&layout)?;
        let local_params = Catalogue::load_local_params(&layout)?;
        let lock = WorkspaceLock::acquire(&layout, &local.hostname)?;

        let mut adaptors = BTreeMap::new();
        for resource in catalogue.iter() {
            let params = local_params.get(&resource.name).cloned().unwrap_or_default();
            let adaptor = build_adaptor(resource, &params, &layout)
                .map_err(|e| EngineError::backend(&resource.name, "open", e))?;
            adaptors.insert(resource.name.clone(), adaptor);
        }
        let lineage = LineageStore::load(&layout.current_lineage_dir())?;
        let vcs = GitRunner::new(layout.root());

        Ok(Self {
            layout,
            config,
            local,
            catalogue,
            local_params,
            adaptors,
            lineage,
            vcs,
            batch,
            verbose,
            _lock: lock,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut WorkspaceConfig {
        &mut self.config
    }

    pub fn save_config(&self) -> Result<(), EngineError> {
        template::validate_template(&self.config.results_dir_template)?;
        self.config.save(&self.layout)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn hostname(&self) -> &str {
        &self.local.hostname
    }

    pub fn username(&self) -> String {
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// Resource names in catalogue order — the processing order of every
    /// engine operation.
    pub fn resource_order(&self) -> Vec<String> {
        self.catalogue.names()
    }

    pub fn adaptor(&mut self, name: &str) -> Result<&mut Box<dyn ResourceAdaptor>, EngineError> {
        self.adaptors
            .get_mut(name)
            .ok_or_else(|| EngineError::internal(format!("no adaptor built for '{}'", name)))
    }

    pub fn adaptor_ref(&self, name: &str) -> Result<&dyn ResourceAdaptor, EngineError> {
        self.adaptors
            .get(name)
            .map(|b| b.as_ref())
            .ok_or_else(|| EngineError::internal(format!("no adaptor built for '{}'", name)))
    }

    pub fn history(&self) -> Result<SnapshotHistory, EngineError> {
        Ok(SnapshotHistory::load(&self.layout)?)
    }

    pub fn lineage(&mut self) -> &mut LineageStore {
        &mut self.lineage
    }

    pub fn lineage_ref(&self) -> &LineageStore {
        &self.lineage
    }

    pub fn save_lineage(&self) -> Result<(), EngineError> {
        self.lineage.save(&self.layout.current_lineage_dir())?;
        Ok(())
    }

    /// Add a resource: transactional catalogue write, adaptor build, and
    /// a metadata commit.
    pub fn add_resource(
        &mut self,
        config: ResourceConfig,
        local: ResourceLocalParams,
    ) -> Result<(), EngineError> {
        let name = config.name.clone();
        let mut txn = self.catalogue.transaction(&mut self.local_params);
        txn.add_resource(config.clone(), local.clone())?;
        txn.commit(&self.layout)?;

        let adaptor = build_adaptor(&config, &local, &self.layout)
            .map_err(|e| EngineError::backend(&name, "add", e))?;
        self.adaptors.insert(name.clone(), adaptor);
        self.commit_metadata(&format!("Add resource {}", name))?;
        info!(resource = %name, "added");
        Ok(())
    }

    pub fn set_local_params(
        &mut self,
        name: &str,
        local: ResourceLocalParams,
    ) -> Result<(), EngineError> {
        let mut txn = self.catalogue.transaction(&mut self.local_params);
        txn.set_local_params(name, local.clone())?;
        txn.commit(&self.layout)?;
        let config = self.catalogue.get(name)?.clone();
        let adaptor = build_adaptor(&config, &local, &self.layout)
            .map_err(|e| EngineError::backend(name, "configure", e))?;
        self.adaptors.insert(name.to_string(), adaptor);
        Ok(())
    }

    /// Commit the shared metadata documents to the workspace repository.
    pub fn commit_metadata(&self, message: &str) -> Result<bool, EngineError> {
        self.vcs
            .commit_paths(&[dw_workspace::layout::METADATA_DIR], message)
            .map_err(system_err)
    }

    pub fn vcs(&self) -> &GitRunner {
        &self.vcs
    }

    /// Reload the shared documents after a pull rewrote them, rebuilding
    /// adaptors for any newly arrived resources.
    pub fn reload_shared(&mut self) -> Result<(), EngineError> {
        self.config = WorkspaceConfig::load(&self.layout)?;
        self.catalogue = Catalogue::load(&self.layout)?;
        self.local_params = Catalogue::load_local_params(&self.layout)?;
        self.adaptors.clear();
        for resource in self.catalogue.iter() {
            let params = self
                .local_params
                .get(&resource.name)
                .cloned()
                .unwrap_or_default();
            let adaptor = build_adaptor(resource, &params, &self.layout)
                .map_err(|e| EngineError::backend(&resource.name, "open", e))?;
            self.adaptors.insert(resource.name.clone(), adaptor);
        }
        Ok(())
    }

    /// Map a filesystem path to the lineage reference it falls under, if
    /// any resource contains it.
    pub fn map_path_to_ref(&self, path: &Path) -> Option<LineageRef> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for (name, adaptor) in &self.adaptors {
            let Some(root) = adaptor.local_path() else {
                continue;
            };
            let root = root
                .canonicalize()
                .unwrap_or_else(|_| root.to_path_buf());
            if canonical == root {
                return Some(LineageRef::resource(name.clone()));
            }
            if let Ok(rel) = canonical.strip_prefix(&root) {
                let sub = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                return Some(LineageRef::subpath(name.clone(), sub));
            }
        }
        None
    }

    /// The current resource-version hash behind a lineage reference
    /// (source-data certificates).
    pub fn resource_version(&self, reference: &LineageRef) -> Result<String, EngineError> {
        let adaptor = self.adaptor_ref(&reference.resource)?;
        adaptor
            .current_state()
            .map_err(|e| EngineError::backend(&reference.resource, "lineage capture", e))
    }
}

pub(crate) fn system_err(err: ResourceError) -> EngineError {
    EngineError::System {
        message: err.to_string(),
    }
}

pub fn system_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
