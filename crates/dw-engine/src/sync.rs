// sync.rs — Push, pull, and clone across the workspace and its resources.
//
// Push sends the workspace catalogue first, then each resource's own
// remote; a diverged workspace remote refuses before anything moves.
// Pull runs the resources first and the catalogue last, so a catalogue
// that arrived with new resources is what the reloaded workspace sees;
// the lineage working set is cleared because incoming snapshots make it
// ambiguous. Clone re-materialises every catalogue resource, prompting
// for machine-local paths unless batch mode supplies defaults.
//
// Transient network failures retry with exponential backoff, three
// attempts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use dw_resources::{build_adaptor, GitRunner, ResourceError};
use dw_workspace::{
    BackendConfig, Catalogue, Layout, LocalConfig, LocalParamsMap, ResourceLocalParams,
};

use crate::error::EngineError;
use crate::workspace::{system_err, system_hostname, Workspace};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub skip: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct PushReport {
    pub pushed: Vec<String>,
    pub skipped: Vec<String>,
}

pub fn push(ws: &mut Workspace, opts: &PushOptions) -> Result<PushReport, EngineError> {
    for name in &opts.skip {
        ws.catalogue().get(name)?;
    }
    let vcs = ws.vcs().clone();
    if vcs.remote_url("origin").map_err(system_err)?.is_none() {
        return Err(EngineError::precondition(
            "the workspace has no remote",
            Some("run `dw publish <url>` first".to_string()),
        ));
    }

    // Catalogue first: commit any pending metadata, refuse on divergence,
    // then push the workspace repository.
    ws.commit_metadata("Update workspace metadata")?;
    vcs.fetch().map_err(system_err)?;
    match vcs.ahead_behind("@{upstream}") {
        Ok((remote_ahead, _)) if remote_ahead > 0 => {
            return Err(EngineError::precondition(
                format!(
                    "workspace remote is ahead by {} commit(s)",
                    remote_ahead
                ),
                Some("run `dw pull` first".to_string()),
            ));
        }
        // No upstream yet (first push) is fine.
        Ok(_) | Err(ResourceError::Subprocess { .. }) => {}
        Err(other) => return Err(system_err(other)),
    }
    with_retry("push workspace repository", || vcs.push()).map_err(system_err)?;

    let mut pushed = Vec::new();
    let mut skipped = Vec::new();
    for name in ws.resource_order() {
        if opts.skip.contains(&name) {
            skipped.push(name);
            continue;
        }
        let adaptor = ws.adaptor(&name)?;
        let Some(synced) = adaptor.as_synced() else {
            skipped.push(name);
            continue;
        };
        with_retry(&format!("push resource {}", name), || synced.push())
            .map_err(|e| EngineError::backend(&name, "push", e))?;
        pushed.push(name);
    }
    info!(pushed = pushed.len(), "push complete");
    Ok(PushReport { pushed, skipped })
}

#[derive(Debug, Clone)]
pub struct PullReport {
    pub pulled: Vec<String>,
}

pub fn pull(ws: &mut Workspace) -> Result<PullReport, EngineError> {
    let mut pulled = Vec::new();
    for name in ws.resource_order() {
        let adaptor = ws.adaptor(&name)?;
        let Some(synced) = adaptor.as_synced() else {
            continue;
        };
        with_retry(&format!("pull resource {}", name), || synced.pull())
            .map_err(|e| EngineError::backend(&name, "pull", e))?;
        pulled.push(name);
    }

    // Catalogue last, so remote resource additions land before reload.
    let vcs = ws.vcs().clone();
    if vcs.remote_url("origin").map_err(system_err)?.is_some() {
        vcs.fetch().map_err(system_err)?;
        with_retry("pull workspace repository", || vcs.pull_ff_only())
            .map_err(system_err)?;
    }
    ws.reload_shared()?;

    // Incoming snapshots make the working lineage ambiguous.
    ws.lineage().clear();
    ws.save_lineage()?;
    info!(pulled = pulled.len(), "pull complete");
    Ok(PullReport { pulled })
}

/// Publish the workspace to a remote for the first time.
pub fn publish(ws: &mut Workspace, url: &str) -> Result<(), EngineError> {
    let vcs = ws.vcs().clone();
    if vcs.remote_url("origin").map_err(system_err)?.is_some() {
        return Err(EngineError::user(
            "the workspace already has a remote configured",
        ));
    }
    vcs.add_remote("origin", url).map_err(system_err)?;
    ws.commit_metadata("Update workspace metadata")?;
    let branch = vcs.current_branch().map_err(system_err)?;
    with_retry("initial push", || vcs.push_initial("origin", &branch)).map_err(system_err)?;
    info!(url, "workspace published");
    Ok(())
}

/// Clone a workspace and re-materialise its resources.
///
/// `prompt_path` is asked for each resource that needs a machine-local
/// path; returning None accepts the default `<target>/<name>`.
pub fn clone_workspace(
    url: &str,
    target: &Path,
    hostname: Option<String>,
    mut prompt_path: impl FnMut(&str, &Path) -> Option<PathBuf>,
) -> Result<PathBuf, EngineError> {
    GitRunner::clone_repo(url, target).map_err(system_err)?;
    let layout = Layout::new(target);
    if !layout.is_initialized() {
        return Err(EngineError::user(format!(
            "{} does not contain a workspace",
            url
        )));
    }
    let local = LocalConfig {
        hostname: hostname.unwrap_or_else(system_hostname),
    };
    local.save(&layout)?;

    let catalogue = Catalogue::load(&layout)?;
    let mut local_params = LocalParamsMap::new();
    for resource in catalogue.iter() {
        let needs_path = !matches!(
            resource.backend,
            BackendConfig::GitSubdir { .. } | BackendConfig::ObjectStore { .. }
        );
        if !needs_path {
            local_params.insert(resource.name.clone(), ResourceLocalParams::default());
            continue;
        }
        let default = target.join(&resource.name);
        let path = prompt_path(&resource.name, &default).unwrap_or(default);
        local_params.insert(
            resource.name.clone(),
            ResourceLocalParams {
                local_path: Some(path),
            },
        );
    }
    Catalogue::save_local_params(&layout, &local_params)?;

    for resource in catalogue.iter() {
        let params = local_params
            .get(&resource.name)
            .cloned()
            .unwrap_or_default();
        let mut adaptor = build_adaptor(resource, &params, &layout)
            .map_err(|e| EngineError::backend(&resource.name, "clone", e))?;
        if let Some(path) = params.local_path.as_deref() {
            match adaptor.as_synced() {
                Some(synced) => {
                    with_retry(&format!("clone resource {}", resource.name), || {
                        synced.clone_to(path)
                    })
                    .map_err(|e| EngineError::backend(&resource.name, "clone", e))?;
                }
                None => {
                    // No remote to pull from (local files): start empty.
                    std::fs::create_dir_all(path).map_err(|e| EngineError::System {
                        message: format!("cannot create {}: {}", path.display(), e),
                    })?;
                    warn!(resource = %resource.name, "no remote; created empty directory");
                }
            }
        }
    }
    info!(url, target = %target.display(), "workspace cloned");
    Ok(target.to_path_buf())
}

fn with_retry<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, ResourceError>,
) -> Result<T, ResourceError> {
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < RETRY_ATTEMPTS && is_transient(&err) => {
                warn!(what, attempt, %err, "transient failure; retrying");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Network-shaped subprocess failures are worth retrying; everything
/// else surfaces immediately.
fn is_transient(err: &ResourceError) -> bool {
    let ResourceError::Subprocess { stderr, .. } = err else {
        return false;
    };
    let stderr = stderr.to_lowercase();
    [
        "could not resolve host",
        "connection reset",
        "connection timed out",
        "operation timed out",
        "temporary failure",
        "network is unreachable",
        "early eof",
        "the remote end hung up",
    ]
    .iter()
    .any(|marker| stderr.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let transient = ResourceError::Subprocess {
            tool: "git".into(),
            args: "push".into(),
            status: Some(128),
            stderr: "fatal: Could not resolve host: example.com".into(),
        };
        assert!(is_transient(&transient));

        let permanent = ResourceError::Subprocess {
            tool: "git".into(),
            args: "push".into(),
            status: Some(1),
            stderr: "rejected: non-fast-forward".into(),
        };
        assert!(!is_transient(&permanent));
        assert!(!is_transient(&ResourceError::ToolMissing {
            tool: "rclone".into()
        }));
    }
}
