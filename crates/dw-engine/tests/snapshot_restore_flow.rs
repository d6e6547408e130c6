// snapshot_restore_flow.rs — End-to-end engine scenarios over real
// backends: a managed git repository and a locally managed directory.
//
// Tests skip silently when git is not installed.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use tempfile::TempDir;

use dw_engine::{restore, snapshot, sync, EngineError, Workspace};
use dw_lineage::LineageRef;
use dw_resources::GitRunner;
use dw_workspace::{BackendConfig, ResourceConfig, ResourceLocalParams, Role};

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn init_git(dir: &Path) -> GitRunner {
    let runner = GitRunner::new(dir);
    runner.init().unwrap();
    runner
        .run(&["config", "user.email", "tests@example.com"])
        .unwrap();
    runner.run(&["config", "user.name", "Tests"]).unwrap();
    runner
}

fn init_workspace() -> (TempDir, Workspace) {
    let root = tempfile::tempdir().unwrap();
    init_git(root.path());
    Workspace::init(root.path(), "ws", Some("testhost".to_string())).unwrap();
    let ws = Workspace::open(root.path(), true, false).unwrap();
    (root, ws)
}

fn add_git_resource(ws: &mut Workspace, name: &str, role: Role, dir: &Path) {
    ws.add_resource(
        ResourceConfig {
            name: name.to_string(),
            role,
            read_only: false,
            backend: BackendConfig::GitRepo {
                remote_url: None,
                branch: None,
            },
        },
        ResourceLocalParams {
            local_path: Some(dir.to_path_buf()),
        },
    )
    .unwrap();
}

fn add_local_resource(ws: &mut Workspace, name: &str, role: Role, dir: &Path) {
    ws.add_resource(
        ResourceConfig {
            name: name.to_string(),
            role,
            read_only: false,
            backend: BackendConfig::LocalFiles {},
        },
        ResourceLocalParams {
            local_path: Some(dir.to_path_buf()),
        },
    )
    .unwrap();
}

fn take_snapshot(ws: &mut Workspace, tag: &str) -> snapshot::SnapshotReport {
    snapshot::run(
        ws,
        &snapshot::SnapshotOptions {
            tag: Some(tag.to_string()),
            message: format!("snapshot {}", tag),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn snapshot_restore_git_round_trip() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let repo = tempfile::tempdir().unwrap();
    let git = init_git(repo.path());
    std::fs::write(repo.path().join("t.py"), "print('a')").unwrap();
    git.commit_all(None, "initial").unwrap();
    add_git_resource(&mut ws, "code", Role::Code, repo.path());

    let v1 = take_snapshot(&mut ws, "V1");

    std::fs::write(repo.path().join("t.py"), "print('a')\n#x").unwrap();
    git.commit_all(None, "edit").unwrap();
    let v2 = take_snapshot(&mut ws, "V2");
    assert_ne!(v1.hash, v2.hash);

    let report = restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: "V1".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(report.failure.is_none());
    assert_eq!(report.restored, vec!["code".to_string()]);
    assert_eq!(
        std::fs::read_to_string(repo.path().join("t.py")).unwrap(),
        "print('a')"
    );
}

#[test]
fn selective_restore_touches_only_the_named_resource() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let repo = tempfile::tempdir().unwrap();
    let git = init_git(repo.path());
    std::fs::write(repo.path().join("t.py"), "print('a')").unwrap();
    git.commit_all(None, "initial").unwrap();
    add_git_resource(&mut ws, "code", Role::Code, repo.path());

    let files = tempfile::tempdir().unwrap();
    std::fs::write(files.path().join("d.csv"), "1,2").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, files.path());

    take_snapshot(&mut ws, "V1");
    std::fs::write(repo.path().join("t.py"), "print('a')\n#x").unwrap();
    git.commit_all(None, "edit").unwrap();
    take_snapshot(&mut ws, "V2");

    // Back to V1 everywhere, then selectively forward only `code`.
    restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: "V1".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    let data_before = ws.adaptor_ref("data").unwrap().current_state().unwrap();
    let history_len = ws.history().unwrap().len();

    let report = restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: "V2".to_string(),
            only: ["code".to_string()].into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(report.restored, vec!["code".to_string()]);
    assert!(std::fs::read_to_string(repo.path().join("t.py"))
        .unwrap()
        .ends_with("#x"));
    // The other resource and the history are untouched.
    assert_eq!(
        ws.adaptor_ref("data").unwrap().current_state().unwrap(),
        data_before
    );
    assert_eq!(ws.history().unwrap().len(), history_len);
}

#[test]
fn dirty_refusal_with_no_new_snapshot() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let files = tempfile::tempdir().unwrap();
    std::fs::write(files.path().join("keep.txt"), "data").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, files.path());
    take_snapshot(&mut ws, "V1");

    std::fs::remove_file(files.path().join("keep.txt")).unwrap();
    let err = restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: "V1".to_string(),
            no_new_snapshot: true,
            ..Default::default()
        },
    )
    .expect_err("dirty state must refuse");
    assert_eq!(err.exit_code(), 1);
    assert!(matches!(err, EngineError::Precondition { .. }));
    // Nothing touched: the manual deletion is still the only change.
    assert!(!files.path().join("keep.txt").exists());
}

#[test]
fn dirty_state_is_preserved_by_auto_snapshot() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let files = tempfile::tempdir().unwrap();
    std::fs::write(files.path().join("notes.txt"), "first").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, files.path());
    let v1 = take_snapshot(&mut ws, "V1");

    std::fs::write(files.path().join("notes.txt"), "uncaptured edit").unwrap();
    let report = restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: "V1".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    let preserved = report.preserved.expect("dirty state auto-snapshotted");
    assert_ne!(preserved, v1.hash);
    assert_eq!(
        std::fs::read_to_string(files.path().join("notes.txt")).unwrap(),
        "first"
    );

    // The preserved snapshot can bring the edit back.
    restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: preserved[..12].to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        std::fs::read_to_string(files.path().join("notes.txt")).unwrap(),
        "uncaptured edit"
    );
}

#[test]
fn results_rotation_moves_pending_files() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let repo = tempfile::tempdir().unwrap();
    let git = init_git(repo.path());
    std::fs::write(repo.path().join("results.csv"), "epoch,acc\n1,0.9").unwrap();
    git.commit_all(None, "initial").unwrap();
    add_git_resource(&mut ws, "results", Role::Results, repo.path());

    take_snapshot(&mut ws, "V1");

    let rotated = repo.path().join("snapshots/testhost-V1/results.csv");
    assert!(rotated.is_file());
    assert!(!repo.path().join("results.csv").exists());

    // Monotonicity: a second snapshot adds, never removes.
    std::fs::write(repo.path().join("next.csv"), "epoch,acc\n2,0.92").unwrap();
    take_snapshot(&mut ws, "V2");
    assert!(rotated.is_file());
    assert!(repo
        .path()
        .join("snapshots/testhost-V2/next.csv")
        .is_file());
}

#[test]
fn results_resources_are_never_restored() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let repo = tempfile::tempdir().unwrap();
    let git = init_git(repo.path());
    std::fs::write(repo.path().join("results.csv"), "1").unwrap();
    git.commit_all(None, "initial").unwrap();
    add_git_resource(&mut ws, "results", Role::Results, repo.path());
    take_snapshot(&mut ws, "V1");

    let err = restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: "V1".to_string(),
            only: ["results".to_string()].into(),
            ..Default::default()
        },
    )
    .expect_err("results in --only is a user error");
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn snapshot_is_deterministic_and_idempotent() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let files = tempfile::tempdir().unwrap();
    std::fs::write(files.path().join("a.txt"), "alpha").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, files.path());

    let first = take_snapshot(&mut ws, "V1");
    assert!(!first.reused);
    let second = take_snapshot(&mut ws, "V1-again");
    assert_eq!(first.hash, second.hash);
    assert!(second.reused);
    // Two history entries, one snapshot.
    assert_eq!(ws.history().unwrap().len(), 2);
}

#[test]
fn tag_reuse_on_same_host_is_refused() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let files = tempfile::tempdir().unwrap();
    std::fs::write(files.path().join("a.txt"), "alpha").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, files.path());
    take_snapshot(&mut ws, "best");

    std::fs::write(files.path().join("a.txt"), "beta").unwrap();
    let err = snapshot::run(
        &mut ws,
        &snapshot::SnapshotOptions {
            tag: Some("best".to_string()),
            ..Default::default()
        },
    )
    .expect_err("tag clash without --force-tag");
    assert_eq!(err.exit_code(), 1);

    // --force-tag moves the tag: the old snapshot loses it, so the tag
    // still names exactly one hash on this host.
    let moved = snapshot::run(
        &mut ws,
        &snapshot::SnapshotOptions {
            tag: Some("best".to_string()),
            force_tag: true,
            ..Default::default()
        },
    )
    .unwrap();
    let history = ws.history().unwrap();
    assert_eq!(history.resolve_ref("best").unwrap().hash, moved.hash);
    let holders: usize = history
        .iter()
        .filter(|e| e.tags.iter().any(|t| t == "best"))
        .count();
    assert_eq!(holders, 1);
}

#[test]
fn lineage_freezes_into_the_snapshot() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let data = tempfile::tempdir().unwrap();
    let mid = tempfile::tempdir().unwrap();
    let fin = tempfile::tempdir().unwrap();
    std::fs::write(data.path().join("raw.csv"), "1,2").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, data.path());
    add_local_resource(&mut ws, "mid", Role::IntermediateData, mid.path());
    add_local_resource(&mut ws, "final", Role::IntermediateData, fin.path());

    record_step(&mut ws, "s1", &["data"], &["mid"]);
    std::fs::write(mid.path().join("mid.csv"), "3,4").unwrap();
    record_step(&mut ws, "s2", &["mid"], &["final"]);
    std::fs::write(fin.path().join("final.csv"), "5,6").unwrap();

    let report = take_snapshot(&mut ws, "L1");

    let frozen =
        dw_lineage::LineageStore::load(&ws.layout().snapshot_lineage_dir(&report.hash)).unwrap();
    let step_names: Vec<String> = frozen.steps().map(|s| s.key()).collect();
    assert!(step_names.contains(&"s1#1".to_string()));
    assert!(step_names.contains(&"s2#1".to_string()));
    let sources: Vec<String> = frozen
        .sources()
        .map(|s| s.reference.resource.clone())
        .collect();
    assert_eq!(sources, vec!["data".to_string()]);
    // Step certificates were resolved to the captured resource hashes.
    let mid_cert = frozen
        .certificate_for(&LineageRef::resource("mid"))
        .expect("mid is certified");
    match mid_cert {
        dw_lineage::Certificate::Hash { produced_by, .. } => {
            assert_eq!(produced_by.as_deref(), Some("s1#1"));
        }
        other => panic!("expected resolved certificate, got {other:?}"),
    }
}

#[test]
fn pull_clears_the_working_lineage() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let data = tempfile::tempdir().unwrap();
    let mid = tempfile::tempdir().unwrap();
    std::fs::write(data.path().join("raw.csv"), "1").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, data.path());
    add_local_resource(&mut ws, "mid", Role::IntermediateData, mid.path());
    record_step(&mut ws, "s1", &["data"], &["mid"]);
    assert!(!ws.lineage_ref().is_empty());

    sync::pull(&mut ws).unwrap();
    assert!(ws.lineage_ref().is_empty());
}

#[test]
fn restore_replaces_lineage_with_the_frozen_graph() {
    if !git_available() {
        return;
    }
    let (_root, mut ws) = init_workspace();
    let data = tempfile::tempdir().unwrap();
    let mid = tempfile::tempdir().unwrap();
    std::fs::write(data.path().join("raw.csv"), "1").unwrap();
    add_local_resource(&mut ws, "data", Role::SourceData, data.path());
    add_local_resource(&mut ws, "mid", Role::IntermediateData, mid.path());

    record_step(&mut ws, "s1", &["data"], &["mid"]);
    let v1 = take_snapshot(&mut ws, "V1");

    // More work after the snapshot, then a restore: the working set goes
    // back to exactly the frozen graph.
    record_step(&mut ws, "s2", &["mid"], &[]);
    assert_eq!(ws.lineage_ref().steps().count(), 2);
    restore::run(
        &mut ws,
        &restore::RestoreOptions {
            reference: v1.hash[..12].to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(ws.lineage_ref().steps().count(), 1);
}

fn record_step(ws: &mut Workspace, name: &str, inputs: &[&str], outputs: &[&str]) {
    let input_refs: Vec<LineageRef> = inputs
        .iter()
        .map(|r| LineageRef::resource(r.to_string()))
        .collect();
    let mut versions = BTreeMap::new();
    for reference in &input_refs {
        let version = ws.resource_version(reference).unwrap();
        versions.insert(reference.clone(), version);
    }
    let token = ws
        .lineage()
        .begin_step(
            name,
            Utc::now(),
            BTreeMap::new(),
            &input_refs,
            None,
            |r: &LineageRef| {
                versions
                    .get(r)
                    .cloned()
                    .ok_or_else(|| "version not prefetched".to_string())
            },
        )
        .unwrap();
    let output_refs: Vec<LineageRef> = outputs
        .iter()
        .map(|r| LineageRef::resource(r.to_string()))
        .collect();
    ws.lineage()
        .end_step(token, output_refs, BTreeMap::new(), Utc::now())
        .unwrap();
    ws.save_lineage().unwrap();
}
