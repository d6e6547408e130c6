// store.rs — The single accessor for metadata reads and writes.
//
// Every JSON document under `.dataworkspace/` goes through these two
// functions. Writes land in a temp file in the same directory and are
// renamed into place, so a crash mid-write never leaves a torn document.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::WorkspaceError;

/// Read and deserialize a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, WorkspaceError> {
    let bytes = std::fs::read(path).map_err(WorkspaceError::io(path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Serialize and atomically write a JSON document (temp file + rename).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), WorkspaceError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

/// Atomically write raw bytes. Used for documents whose exact byte stream
/// matters (snapshot manifests are hashed as written).
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(WorkspaceError::io(parent))?;
    let tmp = tempfile::NamedTempFile::new_in(parent).map_err(WorkspaceError::io(parent))?;
    std::fs::write(tmp.path(), bytes).map_err(WorkspaceError::io(tmp.path()))?;
    tmp.persist(path)
        .map_err(|e| WorkspaceError::IoError {
            path: path.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        n: u32,
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "ws".into(),
            n: 7,
        };
        write_json_atomic(&path, &doc).unwrap();
        let read: Doc = read_json(&path).unwrap();
        assert_eq!(read, doc);
    }

    #[test]
    fn overwrite_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { name: "a".into(), n: 1 }).unwrap();
        write_json_atomic(&path, &Doc { name: "b".into(), n: 2 }).unwrap();
        let read: Doc = read_json(&path).unwrap();
        assert_eq!(read.name, "b");
        // No stray temp files left behind.
        let stray: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy() != "doc.json")
            .collect();
        assert!(stray.is_empty());
    }
}
