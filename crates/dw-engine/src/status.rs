// status.rs — The current state of the workspace, for reporting.

use dw_workspace::{HistoryEntry, SnapshotManifest};

use crate::error::EngineError;
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct ResourceStatus {
    pub name: String,
    pub role: String,
    pub kind: String,
    pub path: Option<String>,
    pub read_only: bool,
    /// None when the backend could not be queried (tool missing, etc.);
    /// the note says why.
    pub dirty: Option<bool>,
    /// Whether the present content matches the latest snapshot's record.
    pub matches_latest: Option<bool>,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub workspace: String,
    pub hostname: String,
    pub resources: Vec<ResourceStatus>,
    pub latest: Option<HistoryEntry>,
    pub lineage_steps: usize,
}

pub fn report(ws: &Workspace) -> Result<StatusReport, EngineError> {
    let history = ws.history()?;
    let latest = history.latest().cloned();
    let latest_manifest = match &latest {
        Some(entry) => Some(SnapshotManifest::load(ws.layout(), &entry.hash)?),
        None => None,
    };

    let mut resources = Vec::new();
    for name in ws.resource_order() {
        let config = ws.catalogue().get(&name)?.clone();
        let adaptor = ws.adaptor_ref(&name)?;
        let mut status = ResourceStatus {
            name: name.clone(),
            role: config.role.to_string(),
            kind: adaptor.kind().to_string(),
            path: adaptor.local_path().map(|p| p.display().to_string()),
            read_only: config.read_only,
            dirty: None,
            matches_latest: None,
            note: None,
        };
        match adaptor.dirty() {
            Ok(dirty) => status.dirty = Some(dirty),
            Err(err) => status.note = Some(err.to_string()),
        }
        if status.note.is_none() {
            if let Some(manifest) = &latest_manifest {
                if let Some(recorded) = manifest.hash_for(&name) {
                    match adaptor.current_state() {
                        Ok(current) => status.matches_latest = Some(current == recorded),
                        Err(err) => status.note = Some(err.to_string()),
                    }
                }
            }
        }
        resources.push(status);
    }

    Ok(StatusReport {
        workspace: ws.name().to_string(),
        hostname: ws.hostname().to_string(),
        resources,
        latest,
        lineage_steps: ws.lineage_ref().steps().count(),
    })
}
