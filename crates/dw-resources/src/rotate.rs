// rotate.rs — Moving pending result files into a per-snapshot subtree.
//
// Shared by every backend with a local materialisation. Files are moved
// with relative paths preserved and set read-only afterwards; rotated
// subtrees are immutable history. If the destination already exists (tag
// reuse across hosts) the move merges; a file-level collision is an
// error, never an overwrite.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use dw_hashtree::ExcludeSet;

use crate::error::ResourceError;

/// Move every current file under `base` (outside `exclude_files`, the
/// exclude set, and the rotation tree itself) into `base/rel_dest_root`.
/// Returns the (from, to) relative pairs actually moved.
pub fn move_current_files(
    resource: &str,
    base: &Path,
    rel_dest_root: &str,
    exclude_files: &BTreeSet<String>,
    excludes: &ExcludeSet,
) -> Result<Vec<(String, String)>, ResourceError> {
    let dest_root = base.join(rel_dest_root);
    let mut moved = Vec::new();
    let mut emptied_dirs: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(base).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ResourceError::IoError {
            path: base.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(base)
            .expect("walk entries live under base")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        if rel.starts_with(&format!("{}/", rel_dest_root)) || excludes.is_excluded(&rel) {
            continue;
        }
        if exclude_files.contains(&rel) {
            continue;
        }

        let dest = dest_root.join(&rel);
        if dest.exists() {
            return Err(ResourceError::RotateCollision {
                resource: resource.to_string(),
                path: format!("{}/{}", rel_dest_root, rel),
            });
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(ResourceError::io(parent))?;
        }
        std::fs::rename(entry.path(), &dest).map_err(ResourceError::io(entry.path()))?;
        set_readonly(&dest, true)?;
        moved.push((rel.clone(), format!("{}/{}", rel_dest_root, rel)));
        if let Some(parent) = entry.path().parent() {
            if parent != base {
                emptied_dirs.push(parent.to_path_buf());
            }
        }
    }

    // Drop directories the move emptied; deepest first so nesting unwinds.
    emptied_dirs.sort();
    emptied_dirs.dedup();
    for dir in emptied_dirs.into_iter().rev() {
        let _ = std::fs::remove_dir(dir);
    }

    debug!(resource, rel_dest_root, count = moved.len(), "rotated results");
    Ok(moved)
}

/// Compensator for a rotation whose surrounding snapshot failed: move the
/// files back and restore their write bit.
pub fn undo_moves(base: &Path, moved: &[(String, String)]) -> Result<(), ResourceError> {
    for (orig, rotated) in moved {
        let src = base.join(rotated);
        let dest = base.join(orig);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(ResourceError::io(parent))?;
        }
        std::fs::rename(&src, &dest).map_err(ResourceError::io(&src))?;
        set_readonly(&dest, false)?;
    }
    Ok(())
}

fn set_readonly(path: &Path, readonly: bool) -> Result<(), ResourceError> {
    let metadata = std::fs::metadata(path).map_err(ResourceError::io(path))?;
    let mut perms = metadata.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(readonly);
    std::fs::set_permissions(path, perms).map_err(ResourceError::io(path))
}
