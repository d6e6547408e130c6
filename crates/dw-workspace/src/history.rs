// history.rs — Snapshot manifests, identity, and the append-only history.
//
// A snapshot's identity is the git-style sha1 of the manifest document
// exactly as written to disk. The manifest is serialized once, hashed,
// and those same bytes land in `snapshots/snapshot-<hash>.json`, so
// re-hashing the file always reproduces the identity.
//
// The history file stores entries oldest-first (append order); display
// reverses it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dw_hashtree::{hash_bytes, is_hash_prefix};

use crate::error::WorkspaceError;
use crate::layout::Layout;
use crate::store;

/// One resource's captured state inside a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    /// Content hash used for comparison and dirty checks.
    pub hash: String,
    /// Opaque backend token needed to restore this exact state (commit id,
    /// object-version map). Absent for backends where the hash suffices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<serde_json::Value>,
}

/// The canonical manifest document. Field order here is serialisation
/// order and therefore part of the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub workspace: String,
    pub params: BTreeMap<String, serde_json::Value>,
    pub resources: Vec<ManifestEntry>,
    pub lineage_dir: String,
}

impl SnapshotManifest {
    /// The exact bytes that are hashed and written.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, WorkspaceError> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// The snapshot identity: sha1 over the canonical bytes.
    pub fn identity(&self) -> Result<String, WorkspaceError> {
        Ok(hash_bytes(&self.canonical_bytes()?))
    }

    /// Write the manifest under its identity; returns the hash.
    pub fn write(&self, layout: &Layout) -> Result<String, WorkspaceError> {
        let bytes = self.canonical_bytes()?;
        let hash = hash_bytes(&bytes);
        store::write_bytes_atomic(&layout.snapshot_manifest_file(&hash), &bytes)?;
        Ok(hash)
    }

    pub fn load(layout: &Layout, hash: &str) -> Result<Self, WorkspaceError> {
        store::read_json(&layout.snapshot_manifest_file(hash))
    }

    pub fn hash_for(&self, resource_name: &str) -> Option<&str> {
        self.resources
            .iter()
            .find(|e| e.name == resource_name)
            .map(|e| e.hash.as_str())
    }

    pub fn entry_for(&self, resource_name: &str) -> Option<&ManifestEntry> {
        self.resources.iter().find(|e| e.name == resource_name)
    }
}

/// One line of `snapshot_history.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub hash: String,
    pub tags: Vec<String>,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Monotonic per-workspace counter; feeds `{SNAPSHOT_NO}` and the
    /// `{TAG}` fallback in results-directory templates.
    #[serde(default)]
    pub snapshot_no: u64,
}

/// The snapshot history: append-only, oldest-first on disk.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHistory {
    entries: Vec<HistoryEntry>,
}

impl SnapshotHistory {
    pub fn load(layout: &Layout) -> Result<Self, WorkspaceError> {
        let path = layout.history_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let entries: Vec<HistoryEntry> = store::read_json(&path)?;
        Ok(Self { entries })
    }

    pub fn save(&self, layout: &Layout) -> Result<(), WorkspaceError> {
        store::write_json_atomic(&layout.history_file(), &self.entries)
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn next_snapshot_no(&self) -> u64 {
        self.entries.iter().map(|e| e.snapshot_no).max().unwrap_or(0) + 1
    }

    /// Entries newest-first, for display.
    pub fn newest_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Strip `tag` from every entry recorded by `hostname`. Used when a
    /// tag is forcibly moved, keeping tags unique per host.
    pub fn remove_tag(&mut self, tag: &str, hostname: &str) {
        for entry in self.entries.iter_mut() {
            if entry.hostname == hostname {
                entry.tags.retain(|t| t != tag);
            }
        }
    }

    /// Drop every history entry recording `hash`. Returns how many were
    /// removed.
    pub fn remove_hash(&mut self, hash: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.hash != hash);
        before - self.entries.len()
    }

    /// The entry that assigned `tag` on `hostname`, if any. Tags are
    /// unique per host; this is the uniqueness check for new tags.
    pub fn tag_on_host(&self, tag: &str, hostname: &str) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.hostname == hostname && e.tags.iter().any(|t| t == tag))
    }

    /// Resolve a user-supplied reference: a tag (any host, newest entry
    /// wins) or a hash prefix of at least six hex characters.
    pub fn resolve_ref(&self, reference: &str) -> Result<&HistoryEntry, WorkspaceError> {
        if let Some(entry) = self
            .entries
            .iter()
            .rev()
            .find(|e| e.tags.iter().any(|t| t == reference))
        {
            return Ok(entry);
        }
        if is_hash_prefix(reference) {
            let mut matches: Vec<&HistoryEntry> = self
                .entries
                .iter()
                .rev()
                .filter(|e| e.hash.starts_with(reference))
                .collect();
            // Several history entries may share a hash (idempotent
            // re-snapshot); they denote the same snapshot.
            matches.dedup_by(|a, b| a.hash == b.hash);
            match matches.len() {
                0 => {}
                1 => return Ok(matches[0]),
                n => {
                    return Err(WorkspaceError::AmbiguousReference {
                        reference: reference.to_string(),
                        count: n,
                    })
                }
            }
        }
        Err(WorkspaceError::UnknownSnapshot {
            reference: reference.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> SnapshotManifest {
        SnapshotManifest {
            workspace: "ws".into(),
            params: BTreeMap::new(),
            resources: vec![ManifestEntry {
                name: "code".into(),
                hash: "a".repeat(40),
                token: Some(serde_json::json!("deadbeef")),
            }],
            lineage_dir: "snapshot_lineage/placeholder".into(),
        }
    }

    fn entry(hash: &str, tags: &[&str], host: &str, no: u64) -> HistoryEntry {
        HistoryEntry {
            hash: hash.to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            hostname: host.to_string(),
            timestamp: Utc::now(),
            message: String::new(),
            metrics: BTreeMap::new(),
            snapshot_no: no,
        }
    }

    #[test]
    fn manifest_identity_is_stable_and_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create_skeleton().unwrap();

        let m = manifest();
        assert_eq!(m.identity().unwrap(), m.identity().unwrap());
        let written = m.write(&layout).unwrap();
        assert_eq!(written, m.identity().unwrap());

        // Re-hashing the file bytes reproduces the identity.
        let bytes = std::fs::read(layout.snapshot_manifest_file(&written)).unwrap();
        assert_eq!(dw_hashtree::hash_bytes(&bytes), written);

        let loaded = SnapshotManifest::load(&layout, &written).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn manifest_identity_changes_with_content() {
        let a = manifest();
        let mut b = manifest();
        b.resources[0].hash = "b".repeat(40);
        assert_ne!(a.identity().unwrap(), b.identity().unwrap());
    }

    #[test]
    fn ref_resolution_tag_then_prefix() {
        let h1 = format!("{}{}", "ab1234", "0".repeat(34));
        let h2 = format!("{}{}", "ab9999", "0".repeat(34));
        let mut history = SnapshotHistory::default();
        history.append(entry(&h1, &["v1"], "hostA", 1));
        history.append(entry(&h2, &["v2"], "hostA", 2));

        assert_eq!(history.resolve_ref("v1").unwrap().hash, h1);
        assert_eq!(history.resolve_ref("ab9999").unwrap().hash, h2);
        assert!(matches!(
            history.resolve_ref("ab12345678"),
            Err(WorkspaceError::UnknownSnapshot { .. })
        ));
        // Below the six-character minimum nothing resolves.
        assert!(matches!(
            history.resolve_ref("ab"),
            Err(WorkspaceError::UnknownSnapshot { .. })
        ));
    }

    #[test]
    fn ambiguous_prefix_detected() {
        let h1 = format!("abcdef{}", "1".repeat(34));
        let h2 = format!("abcdef{}", "2".repeat(34));
        let mut history = SnapshotHistory::default();
        history.append(entry(&h1, &[], "h", 1));
        history.append(entry(&h2, &[], "h", 2));
        assert!(matches!(
            history.resolve_ref("abcdef"),
            Err(WorkspaceError::AmbiguousReference { count: 2, .. })
        ));
    }

    #[test]
    fn duplicate_hash_entries_resolve_cleanly() {
        let h = format!("abcdef{}", "3".repeat(34));
        let mut history = SnapshotHistory::default();
        history.append(entry(&h, &["v1"], "h", 1));
        history.append(entry(&h, &["v1-again"], "h", 2));
        // Same underlying snapshot: not ambiguous.
        assert_eq!(history.resolve_ref("abcdef").unwrap().hash, h);
    }

    #[test]
    fn tag_uniqueness_is_host_scoped() {
        let h1 = "4".repeat(40);
        let h2 = "5".repeat(40);
        let mut history = SnapshotHistory::default();
        history.append(entry(&h1, &["best"], "hostA", 1));
        history.append(entry(&h2, &["best"], "hostB", 2));
        assert!(history.tag_on_host("best", "hostA").is_some());
        assert!(history.tag_on_host("best", "hostC").is_none());
        // Lookup is global: newest entry with the tag wins.
        assert_eq!(history.resolve_ref("best").unwrap().hash, h2);
    }
}
