// add.rs — `dw add <backend> [options] <path>`.

use std::path::{Path, PathBuf};

use clap::{Subcommand, ValueEnum};

use dw_engine::{EngineError, Workspace};
use dw_workspace::{
    BackendConfig, ResourceConfig, ResourceLocalParams, Role, SyncDirection, SyncMode,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    SourceData,
    IntermediateData,
    Code,
    Results,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::SourceData => Role::SourceData,
            RoleArg::IntermediateData => Role::IntermediateData,
            RoleArg::Code => Role::Code,
            RoleArg::Results => Role::Results,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SyncModeArg {
    Copy,
    Sync,
}

impl From<SyncModeArg> for SyncMode {
    fn from(arg: SyncModeArg) -> Self {
        match arg {
            SyncModeArg::Copy => SyncMode::Copy,
            SyncModeArg::Sync => SyncMode::Sync,
        }
    }
}

#[derive(Subcommand)]
pub enum AddBackend {
    /// A git repository managed by the tool.
    Git {
        path: PathBuf,
        #[arg(long, value_enum, default_value = "source-data")]
        role: RoleArg,
        #[arg(long)]
        name: Option<String>,
        /// Remote URL for push/pull/clone.
        #[arg(long)]
        remote: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        read_only: bool,
    },
    /// A subdirectory of the workspace's own repository.
    GitSubdir {
        /// Path relative to the workspace root.
        subpath: String,
        #[arg(long, value_enum, default_value = "intermediate-data")]
        role: RoleArg,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        read_only: bool,
    },
    /// A locally managed directory (no remote).
    Local {
        path: PathBuf,
        #[arg(long, value_enum, default_value = "source-data")]
        role: RoleArg,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        read_only: bool,
    },
    /// A directory mirrored by the external sync utility.
    Sync {
        /// `remote:path` spec understood by the sync tool.
        remote: String,
        path: PathBuf,
        #[arg(long, value_enum, default_value = "source-data")]
        role: RoleArg,
        #[arg(long)]
        name: Option<String>,
        /// Treat the local directory as the master copy.
        #[arg(long)]
        local_is_master: bool,
        #[arg(long, value_enum, default_value = "copy")]
        mode: SyncModeArg,
        /// Sync-tool config file override for this resource.
        #[arg(long)]
        config: Option<String>,
        /// Compare file contents (checksums) instead of sizes.
        #[arg(long)]
        compute_hash: bool,
        #[arg(long)]
        read_only: bool,
    },
    /// An object-store bucket with server-side versioning.
    Bucket {
        bucket: String,
        #[arg(long, value_enum, default_value = "source-data")]
        role: RoleArg,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        read_only: bool,
    },
}

pub fn run(ws: &mut Workspace, backend: AddBackend) -> Result<String, EngineError> {
    let (config, local) = build_config(ws, backend)?;
    let name = config.name.clone();
    ws.add_resource(config, local)?;
    Ok(name)
}

fn build_config(
    ws: &Workspace,
    backend: AddBackend,
) -> Result<(ResourceConfig, ResourceLocalParams), EngineError> {
    let make = |name: Option<String>,
                suggested: String,
                role: RoleArg,
                read_only: bool,
                backend: BackendConfig,
                local_path: Option<PathBuf>| {
        let name = name.unwrap_or_else(|| unique_name(ws, &suggested, role.into()));
        (
            ResourceConfig {
                name,
                role: role.into(),
                read_only,
                backend,
            },
            ResourceLocalParams {
                local_path: local_path.map(absolutize),
            },
        )
    };
    Ok(match backend {
        AddBackend::Git {
            path,
            role,
            name,
            remote,
            branch,
            read_only,
        } => make(
            name,
            basename(&path),
            role,
            read_only,
            BackendConfig::GitRepo {
                remote_url: remote,
                branch,
            },
            Some(path),
        ),
        AddBackend::GitSubdir {
            subpath,
            role,
            name,
            read_only,
        } => make(
            name,
            basename(Path::new(&subpath)),
            role,
            read_only,
            BackendConfig::GitSubdir { subpath },
            None,
        ),
        AddBackend::Local {
            path,
            role,
            name,
            read_only,
        } => make(
            name,
            basename(&path),
            role,
            read_only,
            BackendConfig::LocalFiles {},
            Some(path),
        ),
        AddBackend::Sync {
            remote,
            path,
            role,
            name,
            local_is_master,
            mode,
            config,
            compute_hash,
            read_only,
        } => make(
            name,
            basename(&path),
            role,
            read_only,
            BackendConfig::ExternalSync {
                remote,
                direction: if local_is_master {
                    SyncDirection::LocalIsMaster
                } else {
                    SyncDirection::RemoteIsMaster
                },
                config_path: config,
                compute_hash,
                mode: mode.into(),
            },
            Some(path),
        ),
        AddBackend::Bucket {
            bucket,
            role,
            name,
            region,
            read_only,
        } => make(
            name,
            bucket.clone(),
            role,
            read_only,
            BackendConfig::ObjectStore { bucket, region },
            None,
        ),
    })
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "resource".to_string())
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

/// Suggest a free name: the basename, then `<basename>-<role>`, then a
/// numbered variant.
fn unique_name(ws: &Workspace, suggested: &str, role: Role) -> String {
    let catalogue = ws.catalogue();
    if !catalogue.contains(suggested) {
        return suggested.to_string();
    }
    let with_role = format!("{}-{}", suggested, role);
    if !catalogue.contains(&with_role) {
        return with_role;
    }
    let mut n = 2;
    loop {
        let numbered = format!("{}-{}", with_role, n);
        if !catalogue.contains(&numbered) {
            return numbered;
        }
        n += 1;
    }
}
