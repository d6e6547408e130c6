// tree.rs — Directory digests and the per-file hash catalogue.
//
// A tree digest is the sha1 of the line stream `<relpath> <file-hash>\n`
// over every non-excluded file, in sorted relative-path order, with `/` as
// the separator on every platform. Two machines holding the same bytes and
// the same exclude set produce the same digest. No line-ending
// normalisation: content is hashed byte-exact.

use std::collections::BTreeMap;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use crate::error::HashTreeError;
use crate::hasher::hash_file;

/// Relative-path exclude filter.
///
/// Patterns are globs matched against relative paths. A pattern without a
/// `/` also matches at any depth (so `".git"` excludes nested repositories,
/// matching how directory-basename ignores behave elsewhere in the tool).
/// A matched directory excludes everything beneath it.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
    patterns: Vec<String>,
}

impl ExcludeSet {
    pub fn new<I, S>(patterns: I) -> Result<Self, HashTreeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let mut add = |p: &str| -> Result<(), HashTreeError> {
                builder.add(Glob::new(p).map_err(|source| HashTreeError::BadPattern {
                    pattern: p.to_string(),
                    source,
                })?);
                Ok(())
            };
            add(pattern)?;
            if !pattern.contains('/') {
                add(&format!("**/{}", pattern))?;
            }
            kept.push(pattern.to_string());
        }
        let set = builder.build().map_err(|source| HashTreeError::BadPattern {
            pattern: kept.join(", "),
            source,
        })?;
        Ok(Self { set, patterns: kept })
    }

    /// An empty set that excludes nothing.
    pub fn empty() -> Self {
        Self::new(std::iter::empty::<&str>()).expect("empty exclude set")
    }

    /// True if the relative path, or any of its ancestors, is excluded.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        if self.set.is_match(rel_path) {
            return true;
        }
        let mut prefix = rel_path;
        while let Some(idx) = prefix.rfind('/') {
            prefix = &prefix[..idx];
            if self.set.is_match(prefix) {
                return true;
            }
        }
        false
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// One file's recorded state inside a [`FileIndex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Git-style sha1 of the file contents.
    pub hash: String,
    /// Size in bytes at capture time.
    pub size: u64,
}

/// Differences between a recorded index and a live tree (or another index).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// All paths that differ, in sorted order.
    pub fn changed_paths(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .added
            .iter()
            .chain(self.removed.iter())
            .chain(self.modified.iter())
            .cloned()
            .collect();
        all.sort();
        all
    }
}

/// The per-file hash catalogue behind a tree digest.
///
/// `BTreeMap` keeps entries sorted by relative path, which is what makes
/// [`FileIndex::root_hash`] deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    pub entries: BTreeMap<String, FileEntry>,
}

impl FileIndex {
    /// Walk `root` and hash every non-excluded file.
    pub fn capture(root: &Path, excludes: &ExcludeSet) -> Result<Self, HashTreeError> {
        let mut entries = BTreeMap::new();
        let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|source| HashTreeError::WalkFailed {
                root: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("walk entries live under the walk root");
            let rel = rel_to_string(root, rel)?;
            if excludes.is_excluded(&rel) {
                continue;
            }
            let hash = hash_file(entry.path())?;
            let size = entry
                .metadata()
                .map_err(|source| HashTreeError::WalkFailed {
                    root: root.to_path_buf(),
                    source,
                })?
                .len();
            entries.insert(rel, FileEntry { hash, size });
        }
        Ok(Self { entries })
    }

    /// The digest over the canonical line stream.
    pub fn root_hash(&self) -> String {
        let mut hasher = Sha1::new();
        for (rel, entry) in &self.entries {
            hasher.update(rel.as_bytes());
            hasher.update(b" ");
            hasher.update(entry.hash.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Compare this recorded index against the live tree at `root`.
    pub fn verify(&self, root: &Path, excludes: &ExcludeSet) -> Result<TreeDiff, HashTreeError> {
        let current = Self::capture(root, excludes)?;
        Ok(self.diff(&current))
    }

    /// Paths present in `newer` but not here are `added`; missing from
    /// `newer` are `removed`; present in both with different hashes are
    /// `modified`.
    pub fn diff(&self, newer: &Self) -> TreeDiff {
        let mut diff = TreeDiff::default();
        for (rel, entry) in &newer.entries {
            match self.entries.get(rel) {
                None => diff.added.push(rel.clone()),
                Some(old) if old.hash != entry.hash => diff.modified.push(rel.clone()),
                Some(_) => {}
            }
        }
        for rel in self.entries.keys() {
            if !newer.entries.contains_key(rel) {
                diff.removed.push(rel.clone());
            }
        }
        diff
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.entries.contains_key(rel_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One-shot directory digest: capture an index and hash it.
pub fn hash_tree(root: &Path, excludes: &ExcludeSet) -> Result<String, HashTreeError> {
    Ok(FileIndex::capture(root, excludes)?.root_hash())
}

fn rel_to_string(root: &Path, rel: &Path) -> Result<String, HashTreeError> {
    let s = rel.to_str().ok_or_else(|| HashTreeError::NonUtf8Path {
        root: root.to_path_buf(),
        path: rel.to_path_buf(),
    })?;
    // Canonical separator on every platform.
    Ok(s.replace(std::path::MAIN_SEPARATOR, "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn digest_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "alpha");
        write(dir.path(), "sub/b.txt", "beta");
        let ex = ExcludeSet::empty();
        let h1 = hash_tree(dir.path(), &ex).unwrap();
        let h2 = hash_tree(dir.path(), &ex).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 40);
    }

    #[test]
    fn digest_changes_with_content_and_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "alpha");
        let ex = ExcludeSet::empty();
        let before = hash_tree(dir.path(), &ex).unwrap();

        write(dir.path(), "a.txt", "alpha2");
        let after_edit = hash_tree(dir.path(), &ex).unwrap();
        assert_ne!(before, after_edit);

        fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt")).unwrap();
        let after_rename = hash_tree(dir.path(), &ex).unwrap();
        assert_ne!(after_edit, after_rename);
    }

    #[test]
    fn excluded_paths_do_not_affect_digest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "kept.txt", "data");
        let ex = ExcludeSet::new(["snapshots", ".git"]).unwrap();
        let before = hash_tree(dir.path(), &ex).unwrap();

        write(dir.path(), "snapshots/run1/out.csv", "1,2,3");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main");
        write(dir.path(), "sub/.git/HEAD", "nested");
        let after = hash_tree(dir.path(), &ex).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn verify_reports_drift() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "alpha");
        write(dir.path(), "b.txt", "beta");
        let ex = ExcludeSet::empty();
        let index = FileIndex::capture(dir.path(), &ex).unwrap();

        write(dir.path(), "a.txt", "changed");
        write(dir.path(), "c.txt", "new");
        fs::remove_file(dir.path().join("b.txt")).unwrap();

        let diff = index.verify(dir.path(), &ex).unwrap();
        assert_eq!(diff.modified, vec!["a.txt"]);
        assert_eq!(diff.added, vec!["c.txt"]);
        assert_eq!(diff.removed, vec!["b.txt"]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn exclude_set_ancestor_matching() {
        let ex = ExcludeSet::new(["snapshots", "data/raw"]).unwrap();
        assert!(ex.is_excluded("snapshots"));
        assert!(ex.is_excluded("snapshots/h1-v1/out.csv"));
        assert!(ex.is_excluded("data/raw/file.bin"));
        assert!(!ex.is_excluded("data/cooked/file.bin"));
        // No-slash patterns match at depth too.
        assert!(ex.is_excluded("nested/snapshots/x"));
    }
}
