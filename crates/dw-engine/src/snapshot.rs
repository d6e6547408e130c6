// snapshot.rs — The snapshot engine.
//
// Five phases over the catalogue, in order:
//
//   1. plan        precheck every non-skipped resource; abort clean
//   2. rotate      move pending result files into the per-snapshot subtree
//   3. freeze      resolve and copy the lineage working set to a
//                  placeholder directory
//   4. capture     snapshot every resource; manifest digest = identity
//   5. commit      rename lineage to its hash key, append history, commit
//                  metadata — staged with compensators, so a failure here
//                  rolls the written files back
//
// A failure after phase 2 moves rotated files back before surfacing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use dw_hashtree::ExcludeSet;
use dw_workspace::{
    HistoryEntry, ManifestEntry, SnapshotHistory, SnapshotManifest, WorkspaceError,
};

use crate::error::EngineError;
use crate::metrics::extract_metrics;
use crate::plan::{Action, Plan};
use crate::template::{expand_template, TemplateContext};
use crate::workspace::Workspace;

/// Files never moved by results rotation.
const ROTATION_KEEP: &[&str] = &["README.md", "README.txt"];

#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub tag: Option<String>,
    pub message: String,
    /// Resources left out of this snapshot entirely.
    pub skip: BTreeSet<String>,
    pub force_tag: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub hash: String,
    pub snapshot_no: u64,
    pub tag: Option<String>,
    /// (resource, content hash) pairs in catalogue order.
    pub resources: Vec<(String, String)>,
    /// True when the state was identical to the latest snapshot and only
    /// a new history entry was recorded.
    pub reused: bool,
}

pub fn run(ws: &mut Workspace, opts: &SnapshotOptions) -> Result<SnapshotReport, EngineError> {
    for name in &opts.skip {
        if !ws.catalogue().contains(name) {
            return Err(WorkspaceError::UnknownResource { name: name.clone() }.into());
        }
    }
    let history = ws.history()?;
    if let Some(tag) = &opts.tag {
        if let Some(existing) = history.tag_on_host(tag, ws.hostname()) {
            if !opts.force_tag {
                return Err(WorkspaceError::TagInUse {
                    tag: tag.clone(),
                    hostname: ws.hostname().to_string(),
                    hash: existing.hash.clone(),
                }
                .into());
            }
        }
    }

    let order: Vec<String> = ws
        .resource_order()
        .into_iter()
        .filter(|n| !opts.skip.contains(n))
        .collect();
    if order.is_empty() {
        return Err(EngineError::user("nothing to snapshot: no resources"));
    }

    // Phase 1 — plan. No side effects on any failure.
    let mut fingerprints: BTreeMap<String, String> = BTreeMap::new();
    for name in &order {
        let adaptor = ws.adaptor(name)?;
        adaptor
            .precheck_snapshot()
            .map_err(|e| EngineError::backend(name, "snapshot precheck", e))?;
        let is_results = adaptor.role().is_results();
        if !adaptor.read_only() && !is_results {
            // Results resources mutate legitimately in phase 2, so the
            // stability guard covers the others.
            let state = adaptor
                .current_state()
                .map_err(|e| EngineError::backend(name, "snapshot precheck", e))?;
            fingerprints.insert(name.clone(), state);
        }
    }

    let snapshot_no = history.next_snapshot_no();
    let timestamp = Utc::now();
    // Metrics come from files about to be rotated away; read them now.
    let metrics = extract_metrics(ws);

    // Phase 2 — results rotation.
    let rel_dest = expand_template(
        &ws.config().results_dir_template,
        &TemplateContext {
            username: &ws.username(),
            hostname: ws.hostname(),
            timestamp,
            snapshot_no,
            tag: opts.tag.as_deref(),
        },
    );
    let keep: BTreeSet<String> = ROTATION_KEEP.iter().map(|s| s.to_string()).collect();
    let rotation_excludes = ExcludeSet::new(["snapshots", ".git", dw_workspace::layout::METADATA_DIR])
        .expect("static exclude patterns compile");
    let mut rotated: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for name in &order {
        let adaptor = ws.adaptor(name)?;
        if !adaptor.role().is_results() {
            continue;
        }
        let Some(rotating) = adaptor.as_rotating() else {
            continue;
        };
        match rotating.rotate_results(&rel_dest, &keep, &rotation_excludes) {
            Ok(moved) if !moved.is_empty() => rotated.push((name.clone(), moved)),
            Ok(_) => {}
            Err(e) => {
                unrotate(ws, &rotated);
                return Err(EngineError::backend(name, "results rotation", e));
            }
        }
    }

    // Phases 3–5; rotation is compensated on any failure.
    match capture_and_commit(
        ws, opts, &order, &fingerprints, history, snapshot_no, timestamp, metrics,
    ) {
        Ok(report) => Ok(report),
        Err(err) => {
            unrotate(ws, &rotated);
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn capture_and_commit(
    ws: &mut Workspace,
    opts: &SnapshotOptions,
    order: &[String],
    fingerprints: &BTreeMap<String, String>,
    history: SnapshotHistory,
    snapshot_no: u64,
    timestamp: chrono::DateTime<Utc>,
    metrics: BTreeMap<String, f64>,
) -> Result<SnapshotReport, EngineError> {
    // Phase 4 — content capture, with the TOCTOU guard per resource.
    let mut entries = Vec::with_capacity(order.len());
    for name in order {
        let adaptor = ws.adaptor(name)?;
        if let Some(expected) = fingerprints.get(name) {
            let actual = adaptor
                .current_state()
                .map_err(|e| EngineError::backend(name, "capture", e))?;
            if &actual != expected {
                return Err(EngineError::Inconsistency {
                    message: format!(
                        "resource '{}' changed while the snapshot ran; retry",
                        name
                    ),
                });
            }
        }
        let outcome = adaptor
            .snapshot()
            .map_err(|e| EngineError::backend(name, "capture", e))?;
        entries.push(ManifestEntry {
            name: name.clone(),
            hash: outcome.hash,
            token: outcome.token,
        });
    }

    // Phase 3/4 boundary — resolve step certificates to the captured
    // hashes and copy the working set to a placeholder directory.
    let captured: BTreeMap<String, String> = entries
        .iter()
        .map(|e| (e.name.clone(), e.hash.clone()))
        .collect();
    ws.lineage().materialize(&captured);
    ws.save_lineage()?;
    let lineage_parent = ws.layout().metadata_dir().join("snapshot_lineage");
    let placeholder = lineage_parent.join(format!(".tmp-{}", Uuid::new_v4()));
    ws.lineage().save(&placeholder)?;

    let manifest = SnapshotManifest {
        workspace: ws.name().to_string(),
        params: ws.config().global_params.clone(),
        resources: entries.clone(),
        lineage_dir: "snapshot_lineage".to_string(),
    };
    let hash = manifest.identity()?;
    let reused = history.latest().map(|e| e.hash == hash).unwrap_or(false);

    let entry = HistoryEntry {
        hash: hash.clone(),
        tags: opts.tag.iter().cloned().collect(),
        hostname: ws.hostname().to_string(),
        timestamp,
        message: opts.message.clone(),
        metrics,
        snapshot_no,
    };

    // Phase 5 — commit, staged with compensators.
    let layout = ws.layout().clone();
    let manifest_file = layout.snapshot_manifest_file(&hash);
    let manifest_existed = manifest_file.exists();
    let final_lineage = layout.snapshot_lineage_dir(&hash);
    let lineage_existed = final_lineage.exists();
    let prior_history = history.clone();

    let mut commit: Plan<'_, &Workspace> = Plan::new("snapshot commit");
    {
        let manifest = manifest.clone();
        let manifest_file = manifest_file.clone();
        commit.push(
            Action::new("write snapshot manifest", move |_: &mut &Workspace| {
                manifest.write(&layout).map(|_| ()).map_err(Into::into)
            })
            .with_compensator(move |_: &mut &Workspace| {
                if !manifest_existed {
                    let _ = std::fs::remove_file(&manifest_file);
                }
            }),
        );
    }
    {
        let placeholder = placeholder.clone();
        let final_lineage_exec = final_lineage.clone();
        let final_lineage_comp = final_lineage.clone();
        commit.push(
            Action::new("file per-snapshot lineage", move |_: &mut &Workspace| {
                if final_lineage_exec.exists() {
                    // Identical snapshot re-taken: the frozen lineage is
                    // already in place.
                    let _ = std::fs::remove_dir_all(&placeholder);
                    return Ok(());
                }
                std::fs::rename(&placeholder, &final_lineage_exec).map_err(|e| {
                    EngineError::System {
                        message: format!(
                            "cannot file lineage under {}: {}",
                            final_lineage_exec.display(),
                            e
                        ),
                    }
                })
            })
            .with_compensator(move |_: &mut &Workspace| {
                if !lineage_existed {
                    let _ = std::fs::remove_dir_all(&final_lineage_comp);
                }
            }),
        );
    }
    {
        let layout_exec = ws.layout().clone();
        let layout_comp = ws.layout().clone();
        let prior = prior_history;
        let mut updated = history;
        if opts.force_tag {
            // Moving a tag strips it from the snapshot that held it, so a
            // tag never names two hashes on one host.
            if let Some(tag) = &opts.tag {
                updated.remove_tag(tag, ws.hostname());
            }
        }
        updated.append(entry);
        commit.push(
            Action::new("append history entry", move |_: &mut &Workspace| {
                updated.save(&layout_exec).map_err(Into::into)
            })
            .with_compensator(move |_: &mut &Workspace| {
                let _ = prior.save(&layout_comp);
            }),
        );
    }
    commit.push(Action::new("commit workspace metadata", {
        let hash = hash.clone();
        move |ws: &mut &Workspace| {
            ws.commit_metadata(&format!("Snapshot {}", hash)).map(|_| ())
        }
    }));

    let mut ws_ref: &Workspace = ws;
    commit.run(&mut ws_ref)?;

    info!(%hash, snapshot_no, reused, "snapshot recorded");
    Ok(SnapshotReport {
        hash,
        snapshot_no,
        tag: opts.tag.clone(),
        resources: entries.into_iter().map(|e| (e.name, e.hash)).collect(),
        reused,
    })
}

/// Remove a snapshot: its history entries, manifest, and frozen lineage.
/// Rotated results files stay where they are — they belong to the
/// results resource, not to the metadata.
pub fn delete(ws: &mut Workspace, reference: &str) -> Result<String, EngineError> {
    let mut history = ws.history()?;
    let hash = history.resolve_ref(reference)?.hash.clone();
    history.remove_hash(&hash);
    history.save(ws.layout())?;
    let _ = std::fs::remove_file(ws.layout().snapshot_manifest_file(&hash));
    let _ = std::fs::remove_dir_all(ws.layout().snapshot_lineage_dir(&hash));
    ws.commit_metadata(&format!("Delete snapshot {}", hash))?;
    info!(%hash, "snapshot deleted");
    Ok(hash)
}

fn unrotate(ws: &mut Workspace, rotated: &[(String, Vec<(String, String)>)]) {
    for (name, moved) in rotated.iter().rev() {
        if let Ok(adaptor) = ws.adaptor(name) {
            if let Some(rotating) = adaptor.as_rotating() {
                let _ = rotating.unrotate_results(moved);
            }
        }
    }
}
