// hasher.rs — sha1 hashing of bytes and files.
//
// Hashes use git's object format: the content is prefixed with
// `blob <len>\0` before digesting, so any hash computed here can be
// cross-checked with `git hash-object`. Files are read in 64 KiB chunks.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::HashTreeError;

const BUF_SIZE: usize = 64 * 1024;

/// Snapshot references may be shortened to a prefix of at least this many
/// hex characters.
pub const MIN_HASH_PREFIX_LEN: usize = 6;

/// Hash arbitrary bytes the way `git hash-object` would, returning a
/// 40-character lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", data.len()).as_bytes());
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string. See [`hash_bytes`].
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash the contents of a file on disk, streaming in chunks.
///
/// The blob header needs the content length up front, so the file size is
/// taken from metadata; a concurrent truncation shows up as a short read
/// and surfaces as an I/O error rather than a wrong hash.
pub fn hash_file(path: &Path) -> Result<String, HashTreeError> {
    let io_err = |source| HashTreeError::IoError {
        path: path.to_path_buf(),
        source,
    };
    let len = std::fs::metadata(path).map_err(io_err)?.len();
    let mut file = File::open(path).map_err(io_err)?;

    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", len).as_bytes());
    let mut buf = vec![0u8; BUF_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file shrank while hashing ({} bytes short)", remaining),
            )));
        }
        let take = (n as u64).min(remaining) as usize;
        hasher.update(&buf[..take]);
        remaining -= take as u64;
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Is this a complete 40-hex sha1?
pub fn is_full_hash(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Is this a usable shortened hash (>= 6 lowercase hex characters)?
pub fn is_hash_prefix(s: &str) -> bool {
    s.len() >= MIN_HASH_PREFIX_LEN
        && s.len() <= 40
        && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn matches_git_hash_object() {
        // `echo 'hello' | git hash-object --stdin`
        assert_eq!(
            hash_bytes(b"hello\n"),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
    }

    #[test]
    fn empty_blob_hash() {
        // The well-known git empty-blob hash.
        assert_eq!(
            hash_bytes(b""),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn file_and_bytes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let content = b"some binary\x00content here";
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        drop(f);
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(content));
    }

    #[test]
    fn hash_classification() {
        let full = hash_bytes(b"x");
        assert!(is_full_hash(&full));
        assert!(is_hash_prefix(&full[..8]));
        assert!(!is_hash_prefix("abc12")); // too short
        assert!(!is_hash_prefix("ABCDEF12")); // uppercase
        assert!(!is_full_hash("zzzz"));
    }
}
