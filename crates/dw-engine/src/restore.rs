// restore.rs — The restore engine.
//
// Restores a prior snapshot across the catalogue. Results resources are
// never reverted (they are implicitly left), `--only` and `--leave` are
// mutually exclusive, and dirtiness is handled by first snapshotting the
// current state unless the caller forbade it. Execution is catalogue
// order; a mid-restore backend failure is surfaced with the full partial
// state rather than attempting an impossible cross-backend rollback.

use std::collections::BTreeSet;

use tracing::{info, warn};

use dw_lineage::LineageStore;
use dw_workspace::SnapshotManifest;

use crate::error::EngineError;
use crate::snapshot::{self, SnapshotOptions};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Tag or hash prefix.
    pub reference: String,
    pub only: BTreeSet<String>,
    pub leave: BTreeSet<String>,
    /// Refuse instead of auto-snapshotting when uncaptured work exists.
    pub no_new_snapshot: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreFailure {
    pub resource: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub hash: String,
    /// Snapshot taken to preserve dirty state, if one was.
    pub preserved: Option<String>,
    pub restored: Vec<String>,
    pub left: Vec<String>,
    /// Resources whose restore never ran because an earlier one failed.
    pub pending: Vec<String>,
    /// Partial restoration is accepted and surfaced, not rolled back.
    pub failure: Option<RestoreFailure>,
}

pub fn run(ws: &mut Workspace, opts: &RestoreOptions) -> Result<RestoreReport, EngineError> {
    if !opts.only.is_empty() && !opts.leave.is_empty() {
        return Err(EngineError::user(
            "cannot give both --only and --leave for a restore",
        ));
    }
    for name in opts.only.iter().chain(opts.leave.iter()) {
        ws.catalogue().get(name)?;
    }
    for name in &opts.only {
        if ws.adaptor_ref(name)?.role().is_results() {
            return Err(EngineError::user(format!(
                "'{}' is a results resource; results are never restored",
                name
            )));
        }
    }

    let history = ws.history()?;
    let entry = history.resolve_ref(&opts.reference)?;
    let hash = entry.hash.clone();
    let manifest = SnapshotManifest::load(ws.layout(), &hash)?;

    // Build the restore set in catalogue order.
    let mut restore_set = Vec::new();
    let mut left = Vec::new();
    for name in ws.resource_order() {
        let adaptor = ws.adaptor_ref(&name)?;
        let skip = adaptor.role().is_results()
            || opts.leave.contains(&name)
            || (!opts.only.is_empty() && !opts.only.contains(&name));
        if skip {
            left.push(name);
            continue;
        }
        match manifest.entry_for(&name) {
            Some(_) => restore_set.push(name),
            None => {
                // Added to the workspace after this snapshot; leave as-is.
                warn!(resource = %name, "not in snapshot; leaving at current state");
                left.push(name);
            }
        }
    }
    if restore_set.is_empty() {
        return Err(EngineError::user(format!(
            "snapshot {} covers none of the requested resources",
            &hash[..12]
        )));
    }

    // Dirtiness: preserve current work first, or refuse.
    let mut preserved = None;
    let mut dirty = Vec::new();
    for name in &restore_set {
        let adaptor = ws.adaptor_ref(name)?;
        if adaptor
            .dirty()
            .map_err(|e| EngineError::backend(name, "restore precheck", e))?
        {
            dirty.push(name.clone());
        }
    }
    if !dirty.is_empty() {
        if opts.no_new_snapshot {
            return Err(EngineError::precondition(
                format!(
                    "restore would lose uncaptured changes in: {}",
                    dirty.join(", ")
                ),
                Some("take a snapshot first, or drop --no-new-snapshot".to_string()),
            ));
        }
        info!(resources = ?dirty, "snapshotting current state before restore");
        let auto = snapshot::run(
            ws,
            &SnapshotOptions {
                tag: None,
                message: format!("Automatic snapshot before restore to {}", &hash[..12]),
                skip: BTreeSet::new(),
                force_tag: false,
            },
        )?;
        preserved = Some(auto.hash);
    }

    // Precheck every member against the manifest before touching state,
    // remembering each resource's fingerprint for the stability guard.
    let mut fingerprints = std::collections::BTreeMap::new();
    for name in &restore_set {
        let entry = manifest
            .entry_for(name)
            .expect("restore set built from manifest");
        let adaptor = ws.adaptor_ref(name)?;
        adaptor
            .precheck_restore(entry)
            .map_err(|e| EngineError::backend(name, "restore precheck", e))?;
        if !adaptor.read_only() {
            let state = adaptor
                .current_state()
                .map_err(|e| EngineError::backend(name, "restore precheck", e))?;
            fingerprints.insert(name.clone(), state);
        }
    }

    // Execute in catalogue order. Later resources are reported as
    // pending if an earlier one fails.
    let mut restored = Vec::new();
    let mut failure = None;
    for (index, name) in restore_set.iter().enumerate() {
        let entry = manifest
            .entry_for(name)
            .expect("restore set built from manifest");
        let adaptor = ws.adaptor(name)?;
        if let Some(expected) = fingerprints.get(name) {
            let actual = adaptor
                .current_state()
                .map_err(|e| EngineError::backend(name, "restore", e))?;
            if &actual != expected {
                return Err(EngineError::Inconsistency {
                    message: format!(
                        "resource '{}' changed while the restore ran; retry",
                        name
                    ),
                });
            }
        }
        match adaptor.restore(entry) {
            Ok(()) => restored.push(name.clone()),
            Err(e) => {
                let wrapped = EngineError::backend(name, "restore", e);
                warn!(resource = %name, error = %wrapped, "restore failed; accepting partial state");
                failure = Some(RestoreFailure {
                    resource: name.clone(),
                    message: wrapped.to_string(),
                });
                return Ok(RestoreReport {
                    hash,
                    preserved,
                    restored,
                    left,
                    pending: restore_set[index + 1..].to_vec(),
                    failure,
                });
            }
        }
    }

    // Replace the lineage working set with the snapshot's frozen graph.
    let frozen_dir = ws.layout().snapshot_lineage_dir(&hash);
    let frozen = LineageStore::load(&frozen_dir)?;
    *ws.lineage() = frozen;
    ws.save_lineage()?;

    info!(%hash, restored = restored.len(), "restore complete");
    Ok(RestoreReport {
        hash,
        preserved,
        restored,
        left,
        pending: Vec::new(),
        failure,
    })
}
