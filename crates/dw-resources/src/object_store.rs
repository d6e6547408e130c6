// object_store.rs — Bucket backend over server-side object versioning.
//
// The bucket itself holds the truth: a snapshot is the manifest
// `{key -> object-version-id}` collected from the current listing. The
// manifest is written back into the bucket at `.snapshots/<hash>.json.gz`
// and cached under the per-clone scratch directory. Restore "activates" a
// snapshot by writing its hash into a local marker file; the filesystem
// view resolves reads through the active manifest's version ids.
//
// The store client is the narrow adaptor seam: list, get, put. The
// default implementation shells out to an `aws s3api`-compatible CLI.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use dw_hashtree::hash_bytes;
use dw_workspace::{ManifestEntry, Role};

use crate::adaptor::{FilesystemView, ResourceAdaptor, SnapshotOutcome};
use crate::error::ResourceError;
use crate::exec::run_tool;

/// Prefix inside the bucket reserved for snapshot manifests; never part
/// of the content hash.
const SNAPSHOTS_PREFIX: &str = ".snapshots/";

/// Map from object key to its current version id.
pub type VersionManifest = BTreeMap<String, String>;

/// Narrow client over the object store.
pub trait ObjectStoreClient {
    /// Current (latest, non-deleted) version id per key.
    fn list_current(&self, bucket: &str) -> Result<VersionManifest, ResourceError>;
    /// Read one object, optionally at a specific version.
    fn get(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<Vec<u8>, ResourceError>;
    /// Write one object (new current version).
    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ResourceError>;
    /// Verify the client can run at all (tool installed, credentials
    /// plumbed). Must not touch the bucket.
    fn available(&self) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// `aws s3api`-compatible CLI client.
pub struct S3CliClient {
    exe: String,
    region: Option<String>,
}

impl S3CliClient {
    pub fn new(region: Option<String>) -> Self {
        Self {
            exe: "aws".to_string(),
            region,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, ResourceError> {
        let mut full: Vec<&str> = Vec::new();
        if let Some(region) = &self.region {
            full.push("--region");
            full.push(region);
        }
        full.extend_from_slice(args);
        run_tool(&self.exe, &full, None)
    }
}

impl ObjectStoreClient for S3CliClient {
    fn list_current(&self, bucket: &str) -> Result<VersionManifest, ResourceError> {
        let out = self.run(&[
            "s3api",
            "list-object-versions",
            "--bucket",
            bucket,
            "--output",
            "json",
        ])?;
        let doc: serde_json::Value = serde_json::from_str(&out)?;
        let mut manifest = VersionManifest::new();
        if let Some(versions) = doc.get("Versions").and_then(|v| v.as_array()) {
            for version in versions {
                if version.get("IsLatest").and_then(|b| b.as_bool()) != Some(true) {
                    continue;
                }
                let (Some(key), Some(id)) = (
                    version.get("Key").and_then(|k| k.as_str()),
                    version.get("VersionId").and_then(|k| k.as_str()),
                ) else {
                    continue;
                };
                manifest.insert(key.to_string(), id.to_string());
            }
        }
        // Keys shadowed by a delete marker are not current.
        if let Some(markers) = doc.get("DeleteMarkers").and_then(|v| v.as_array()) {
            for marker in markers {
                if marker.get("IsLatest").and_then(|b| b.as_bool()) != Some(true) {
                    continue;
                }
                if let Some(key) = marker.get("Key").and_then(|k| k.as_str()) {
                    manifest.remove(key);
                }
            }
        }
        Ok(manifest)
    }

    fn get(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&str>,
    ) -> Result<Vec<u8>, ResourceError> {
        let tmp = tempfile_path();
        let tmp_str = tmp.to_string_lossy().to_string();
        let mut args = vec!["s3api", "get-object", "--bucket", bucket, "--key", key];
        if let Some(v) = version {
            args.push("--version-id");
            args.push(v);
        }
        args.push(&tmp_str);
        self.run(&args)?;
        let bytes = std::fs::read(&tmp).map_err(ResourceError::io(&tmp))?;
        let _ = std::fs::remove_file(&tmp);
        Ok(bytes)
    }

    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ResourceError> {
        let tmp = tempfile_path();
        std::fs::write(&tmp, body).map_err(ResourceError::io(&tmp))?;
        let tmp_str = tmp.to_string_lossy().to_string();
        let body_arg = format!("fileb://{}", tmp_str);
        let result = self.run(&[
            "s3api",
            "put-object",
            "--bucket",
            bucket,
            "--key",
            key,
            "--body",
            &body_arg,
        ]);
        let _ = std::fs::remove_file(&tmp);
        result.map(|_| ())
    }

    fn available(&self) -> Result<(), ResourceError> {
        self.run(&["--version"]).map(|_| ())
    }
}

fn tempfile_path() -> PathBuf {
    std::env::temp_dir().join(format!("dw-s3-{}", std::process::id()))
}

pub struct ObjectStoreResource {
    name: String,
    role: Role,
    read_only: bool,
    bucket: String,
    scratch_dir: PathBuf,
    client: Box<dyn ObjectStoreClient>,
}

impl ObjectStoreResource {
    pub fn new(
        name: impl Into<String>,
        role: Role,
        read_only: bool,
        bucket: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        client: Box<dyn ObjectStoreClient>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            read_only,
            bucket: bucket.into(),
            scratch_dir: scratch_dir.into(),
            client,
        }
    }

    fn marker_file(&self) -> PathBuf {
        self.scratch_dir.join("current_snapshot.txt")
    }

    fn cache_file(&self, hash: &str) -> PathBuf {
        self.scratch_dir
            .join("snapshot_cache")
            .join(format!("{}.json.gz", hash))
    }

    fn manifest_key(hash: &str) -> String {
        format!("{}{}.json.gz", SNAPSHOTS_PREFIX, hash)
    }

    /// The snapshot hash the filesystem view currently resolves through.
    pub fn active_snapshot(&self) -> Result<Option<String>, ResourceError> {
        let marker = self.marker_file();
        if !marker.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&marker).map_err(ResourceError::io(&marker))?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    fn live_manifest(&self) -> Result<VersionManifest, ResourceError> {
        let mut manifest = self.client.list_current(&self.bucket)?;
        manifest.retain(|key, _| !key.starts_with(SNAPSHOTS_PREFIX));
        Ok(manifest)
    }

    fn manifest_bytes(manifest: &VersionManifest) -> Result<Vec<u8>, ResourceError> {
        let mut bytes = serde_json::to_vec_pretty(manifest)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Fetch a snapshot manifest: local cache first, then the bucket.
    fn load_manifest(&self, hash: &str) -> Result<VersionManifest, ResourceError> {
        let cache = self.cache_file(hash);
        let gz_bytes = if cache.exists() {
            std::fs::read(&cache).map_err(ResourceError::io(&cache))?
        } else {
            let bytes = self
                .client
                .get(&self.bucket, &Self::manifest_key(hash), None)?;
            if let Some(parent) = cache.parent() {
                std::fs::create_dir_all(parent).map_err(ResourceError::io(parent))?;
            }
            std::fs::write(&cache, &bytes).map_err(ResourceError::io(&cache))?;
            bytes
        };
        let mut decoder = GzDecoder::new(&gz_bytes[..]);
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(ResourceError::io(&cache))?;
        Ok(serde_json::from_slice(&json)?)
    }

    fn write_marker(&self, hash: &str) -> Result<(), ResourceError> {
        std::fs::create_dir_all(&self.scratch_dir).map_err(ResourceError::io(&self.scratch_dir))?;
        let marker = self.marker_file();
        std::fs::write(&marker, format!("{}\n", hash)).map_err(ResourceError::io(&marker))
    }
}

impl ResourceAdaptor for ObjectStoreResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        self.role
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn kind(&self) -> &'static str {
        "bucket"
    }

    fn local_path(&self) -> Option<&Path> {
        None
    }

    fn dirty(&self) -> Result<bool, ResourceError> {
        // The server holds the truth; there is no local working copy a
        // restore could destroy.
        Ok(false)
    }

    fn current_state(&self) -> Result<String, ResourceError> {
        let manifest = self.live_manifest()?;
        Ok(hash_bytes(&Self::manifest_bytes(&manifest)?))
    }

    fn precheck_snapshot(&self) -> Result<(), ResourceError> {
        self.client.available()
    }

    fn snapshot(&mut self) -> Result<SnapshotOutcome, ResourceError> {
        let manifest = self.live_manifest()?;
        let bytes = Self::manifest_bytes(&manifest)?;
        let hash = hash_bytes(&bytes);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&bytes)
            .map_err(ResourceError::io(&self.scratch_dir))?;
        let gz = encoder
            .finish()
            .map_err(ResourceError::io(&self.scratch_dir))?;
        if !self.read_only {
            self.client
                .put(&self.bucket, &Self::manifest_key(&hash), &gz)?;
        }
        let cache = self.cache_file(&hash);
        if let Some(parent) = cache.parent() {
            std::fs::create_dir_all(parent).map_err(ResourceError::io(parent))?;
        }
        std::fs::write(&cache, &gz).map_err(ResourceError::io(&cache))?;

        self.write_marker(&hash)?;
        info!(resource = %self.name, %hash, keys = manifest.len(), "captured bucket manifest");
        Ok(SnapshotOutcome::hash_only(hash))
    }

    fn precheck_restore(&self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        self.load_manifest(&entry.hash).map(|_| ())
    }

    fn restore(&mut self, entry: &ManifestEntry) -> Result<(), ResourceError> {
        // Activation only: the filesystem view resolves reads through the
        // manifest's version ids from here on.
        self.load_manifest(&entry.hash)?;
        self.write_marker(&entry.hash)?;
        debug!(resource = %self.name, hash = %entry.hash, "activated snapshot");
        Ok(())
    }

    fn diff(
        &self,
        from: &ManifestEntry,
        to: &ManifestEntry,
    ) -> Result<BTreeSet<String>, ResourceError> {
        let from_manifest = self.load_manifest(&from.hash)?;
        let to_manifest = self.load_manifest(&to.hash)?;
        let mut changed = BTreeSet::new();
        for (key, version) in &to_manifest {
            match from_manifest.get(key) {
                None => {
                    changed.insert(key.clone());
                }
                Some(old) if old != version => {
                    changed.insert(key.clone());
                }
                Some(_) => {}
            }
        }
        for key in from_manifest.keys() {
            if !to_manifest.contains_key(key) {
                changed.insert(key.clone());
            }
        }
        Ok(changed)
    }

    fn as_fs_view(&self) -> Option<&dyn FilesystemView> {
        Some(self)
    }
}

impl FilesystemView for ObjectStoreResource {
    fn ls(&self, prefix: &str) -> Result<Vec<String>, ResourceError> {
        let manifest = match self.active_snapshot()? {
            Some(hash) => self.load_manifest(&hash)?,
            None => self.live_manifest()?,
        };
        Ok(manifest
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn open(&self, key: &str) -> Result<Vec<u8>, ResourceError> {
        match self.active_snapshot()? {
            Some(hash) => {
                let manifest = self.load_manifest(&hash)?;
                let version =
                    manifest
                        .get(key)
                        .ok_or_else(|| ResourceError::NotRestorable {
                            resource: self.name.clone(),
                            reason: format!("key '{}' is not in the active snapshot", key),
                        })?;
                self.client.get(&self.bucket, key, Some(version))
            }
            None => self.client.get(&self.bucket, key, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory versioned bucket.
    #[derive(Default)]
    struct FakeBucket {
        // key -> list of versions (version id, bytes); last is current
        objects: RefCell<HashMap<String, Vec<(String, Vec<u8>)>>>,
        counter: RefCell<u32>,
    }

    impl ObjectStoreClient for FakeBucket {
        fn list_current(&self, _bucket: &str) -> Result<VersionManifest, ResourceError> {
            Ok(self
                .objects
                .borrow()
                .iter()
                .filter_map(|(k, versions)| {
                    versions.last().map(|(id, _)| (k.clone(), id.clone()))
                })
                .collect())
        }

        fn get(
            &self,
            _bucket: &str,
            key: &str,
            version: Option<&str>,
        ) -> Result<Vec<u8>, ResourceError> {
            let objects = self.objects.borrow();
            let versions = objects.get(key).ok_or_else(|| ResourceError::Subprocess {
                tool: "fake".into(),
                args: format!("get {}", key),
                status: Some(1),
                stderr: "NoSuchKey".into(),
            })?;
            let found = match version {
                Some(id) => versions.iter().find(|(v, _)| v == id),
                None => versions.last(),
            };
            found
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| ResourceError::Subprocess {
                    tool: "fake".into(),
                    args: format!("get {}@{:?}", key, version),
                    status: Some(1),
                    stderr: "NoSuchVersion".into(),
                })
        }

        fn put(&self, _bucket: &str, key: &str, body: &[u8]) -> Result<(), ResourceError> {
            let mut counter = self.counter.borrow_mut();
            *counter += 1;
            let id = format!("v{}", counter);
            self.objects
                .borrow_mut()
                .entry(key.to_string())
                .or_default()
                .push((id, body.to_vec()));
            Ok(())
        }
    }

    fn resource(scratch: &Path, bucket: std::rc::Rc<FakeBucket>) -> ObjectStoreResource {
        struct Shared(std::rc::Rc<FakeBucket>);
        impl ObjectStoreClient for Shared {
            fn list_current(&self, b: &str) -> Result<VersionManifest, ResourceError> {
                self.0.list_current(b)
            }
            fn get(
                &self,
                b: &str,
                k: &str,
                v: Option<&str>,
            ) -> Result<Vec<u8>, ResourceError> {
                self.0.get(b, k, v)
            }
            fn put(&self, b: &str, k: &str, body: &[u8]) -> Result<(), ResourceError> {
                self.0.put(b, k, body)
            }
        }
        ObjectStoreResource::new(
            "bucket",
            Role::SourceData,
            false,
            "lab-data",
            scratch,
            Box::new(Shared(bucket)),
        )
    }

    #[test]
    fn snapshot_activate_and_versioned_reads() {
        let scratch = tempfile::tempdir().unwrap();
        let bucket = std::rc::Rc::new(FakeBucket::default());
        bucket.put("lab-data", "train.csv", b"v1 rows").unwrap();

        let mut r = resource(scratch.path(), bucket.clone());
        let v1 = r.snapshot().unwrap();
        // The manifest landed in the bucket under .snapshots/.
        assert!(bucket
            .objects
            .borrow()
            .contains_key(&format!(".snapshots/{}.json.gz", v1.hash)));

        // The bucket moves on.
        bucket.put("lab-data", "train.csv", b"v2 rows").unwrap();
        bucket.put("lab-data", "extra.csv", b"new file").unwrap();
        let v2 = r.snapshot().unwrap();
        assert_ne!(v1.hash, v2.hash);

        // Re-activate v1: reads resolve to the old version id.
        let e1 = ManifestEntry {
            name: "bucket".into(),
            hash: v1.hash.clone(),
            token: None,
        };
        r.precheck_restore(&e1).unwrap();
        r.restore(&e1).unwrap();
        let view = r.as_fs_view().unwrap();
        assert_eq!(view.open("train.csv").unwrap(), b"v1 rows");
        assert_eq!(view.ls("").unwrap(), vec!["train.csv".to_string()]);

        // Diff between the two snapshots.
        let e2 = ManifestEntry {
            name: "bucket".into(),
            hash: v2.hash.clone(),
            token: None,
        };
        let changed = r.diff(&e1, &e2).unwrap();
        assert!(changed.contains("extra.csv"));
        assert!(changed.contains("train.csv"));
    }

    #[test]
    fn snapshot_manifests_are_excluded_from_identity() {
        let scratch = tempfile::tempdir().unwrap();
        let bucket = std::rc::Rc::new(FakeBucket::default());
        bucket.put("lab-data", "data.bin", b"stuff").unwrap();

        let mut r = resource(scratch.path(), bucket.clone());
        let v1 = r.snapshot().unwrap();
        // Snapshotting again without content changes: the manifest file
        // written by v1 must not alter the identity.
        let v2 = r.snapshot().unwrap();
        assert_eq!(v1.hash, v2.hash);
    }
}
