// diff.rs — Compare two snapshots resource by resource.

use std::collections::BTreeSet;

use dw_workspace::SnapshotManifest;

use crate::error::EngineError;
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct ResourceDiff {
    pub name: String,
    pub from_hash: Option<String>,
    pub to_hash: Option<String>,
    pub changed: bool,
    /// Changed paths when the backend can enumerate them.
    pub paths: Option<BTreeSet<String>>,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub from: String,
    pub to: String,
    pub resources: Vec<ResourceDiff>,
}

pub fn run(ws: &Workspace, from_ref: &str, to_ref: &str) -> Result<DiffReport, EngineError> {
    let history = ws.history()?;
    let from_hash = history.resolve_ref(from_ref)?.hash.clone();
    let to_hash = history.resolve_ref(to_ref)?.hash.clone();
    let from_manifest = SnapshotManifest::load(ws.layout(), &from_hash)?;
    let to_manifest = SnapshotManifest::load(ws.layout(), &to_hash)?;

    // Catalogue order first, then names only the snapshots know.
    let mut names: Vec<String> = ws.resource_order();
    for entry in from_manifest.resources.iter().chain(to_manifest.resources.iter()) {
        if !names.contains(&entry.name) {
            names.push(entry.name.clone());
        }
    }

    let mut resources = Vec::new();
    for name in names {
        let from_entry = from_manifest.entry_for(&name);
        let to_entry = to_manifest.entry_for(&name);
        let changed = match (from_entry, to_entry) {
            (Some(a), Some(b)) => a.hash != b.hash,
            (None, None) => false,
            _ => true,
        };
        let mut paths = None;
        let mut note = None;
        match (from_entry, to_entry) {
            (Some(a), Some(b)) if changed => match ws.adaptor_ref(&name) {
                Ok(adaptor) => match adaptor.diff(a, b) {
                    Ok(set) => paths = Some(set),
                    Err(err) => note = Some(format!("path diff unavailable: {}", err)),
                },
                Err(_) => note = Some("resource no longer in the catalogue".to_string()),
            },
            (None, Some(_)) => note = Some("added in the newer snapshot".to_string()),
            (Some(_), None) => note = Some("absent from the newer snapshot".to_string()),
            _ => {}
        }
        resources.push(ResourceDiff {
            name,
            from_hash: from_entry.map(|e| e.hash.clone()),
            to_hash: to_entry.map(|e| e.hash.clone()),
            changed,
            paths,
            note,
        });
    }
    Ok(DiffReport {
        from: from_hash,
        to: to_hash,
        resources,
    })
}
