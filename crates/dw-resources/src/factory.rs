// factory.rs — Build an adaptor from a catalogue entry.
//
// Dispatch is by the backend tag of the shared configuration, combined
// with this clone's local parameters and the workspace layout.

use dw_hashtree::ExcludeSet;
use dw_workspace::{BackendConfig, Layout, ResourceConfig, ResourceLocalParams, Role};

use crate::adaptor::ResourceAdaptor;
use crate::error::ResourceError;
use crate::external_sync::ExternalSyncResource;
use crate::git::ManagedGitResource;
use crate::git_subdir::GitSubdirResource;
use crate::local::LocalFilesResource;
use crate::object_store::{ObjectStoreResource, S3CliClient};

/// The exclude set for a resource's content hash: VCS internals, the
/// metadata directory, and (for results resources) the rotated snapshot
/// subtrees, which are immutable history rather than current content.
pub fn content_excludes(role: Role) -> ExcludeSet {
    let mut patterns = vec![".git", dw_workspace::layout::METADATA_DIR];
    if role.is_results() {
        patterns.push("snapshots");
    }
    ExcludeSet::new(patterns).expect("static exclude patterns compile")
}

pub fn build_adaptor(
    config: &ResourceConfig,
    local: &ResourceLocalParams,
    layout: &Layout,
) -> Result<Box<dyn ResourceAdaptor>, ResourceError> {
    let excludes = content_excludes(config.role);
    let require_path = || {
        local
            .local_path
            .clone()
            .ok_or_else(|| ResourceError::MissingLocalPath {
                resource: config.name.clone(),
            })
    };
    Ok(match &config.backend {
        BackendConfig::GitRepo { remote_url, .. } => Box::new(ManagedGitResource::new(
            &config.name,
            config.role,
            config.read_only,
            require_path()?,
            remote_url.clone(),
        )),
        BackendConfig::GitSubdir { subpath } => Box::new(GitSubdirResource::new(
            &config.name,
            config.role,
            config.read_only,
            layout.root(),
            subpath.clone(),
            excludes,
        )),
        BackendConfig::LocalFiles {} => Box::new(LocalFilesResource::new(
            &config.name,
            config.role,
            config.read_only,
            require_path()?,
            layout.file_index_dir(&config.name),
            excludes,
        )),
        BackendConfig::ExternalSync {
            remote,
            direction,
            config_path,
            compute_hash,
            mode,
        } => Box::new(ExternalSyncResource::new(
            &config.name,
            config.role,
            config.read_only,
            require_path()?,
            remote.clone(),
            *direction,
            *mode,
            *compute_hash,
            config_path.clone(),
            layout.file_index_dir(&config.name),
            excludes,
        )),
        BackendConfig::ObjectStore { bucket, region } => Box::new(ObjectStoreResource::new(
            &config.name,
            config.role,
            config.read_only,
            bucket.clone(),
            layout.scratch_dir(&config.name),
            Box::new(S3CliClient::new(region.clone())),
        )),
    })
}
