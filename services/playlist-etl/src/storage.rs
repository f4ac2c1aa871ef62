//!
//! src/storage.rs  Andrew Belles  Sept 14th, 2025
//!
//! Object store abstraction shared by the extractor and transformer.
//! Keys are '/' separated paths relative to a bucket.
//!

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Component, Path, PathBuf},
    sync::Mutex
};

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::errors::EtlError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Keys under `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, EtlError>;
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), EtlError>;
    async fn copy(&self, src: &str, dst: &str) -> Result<(), EtlError>;
    /// Deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<(), EtlError>;
    async fn exists(&self, key: &str) -> Result<bool, EtlError>;

    /// Not atomic unless the backend overrides it. A failed delete
    /// leaves the object at both keys.
    async fn rename(&self, src: &str, dst: &str) -> Result<(), EtlError> {
        self.copy(src, dst).await?;
        self.delete(src).await
    }
}

/// Last path segment of a key
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

///
/// Filesystem backed store: the bucket is a directory under `root`
///
pub struct DiskStore {
    bucket: String,
    root: PathBuf
}

impl DiskStore {
    pub fn open(cfg: &StorageConfig) -> Result<Self, EtlError> {
        let root = cfg.root.join(&cfg.bucket);
        fs::create_dir_all(&root).map_err(|e|
            EtlError::storage("open", &cfg.bucket, format!("create {}: {e}", root.display()))
        )?;
        Ok( Self { bucket: cfg.bucket.clone(), root } )
    }

    fn path_for(&self, op: &'static str, key: &str) -> Result<PathBuf, EtlError> {
        let rel = Path::new(key);
        let clean = !key.is_empty() && rel.components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(EtlError::storage(op, key, "key must be a relative path"));
        }
        Ok(self.root.join(rel))
    }

    fn ensure_parent(op: &'static str, key: &str, path: &Path) -> Result<(), EtlError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e|
                EtlError::storage(op, key, format!("create dir {}: {e}", parent.display()))
            )?;
        }
        Ok(())
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = rel.components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(parts?.join("/"))
    }
}

#[async_trait]
impl ObjectStore for DiskStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
        // walk only the deepest directory the prefix names
        let dir = match prefix.rfind('/') {
            Some(i) => self.path_for("list", &prefix[..i])?,
            None => self.root.clone()
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&dir).min_depth(1) {
            let entry = entry.map_err(|e| EtlError::storage("list", prefix, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            // in-flight tempfiles from put()
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if let Some(key) = self.key_for(entry.path()) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, EtlError> {
        let path = self.path_for("get", key)?;
        fs::read(&path).map_err(|e| EtlError::storage("get", key, e))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), EtlError> {
        let path = self.path_for("put", key)?;
        Self::ensure_parent("put", key, &path)?;
        let parent = path.parent().unwrap_or(&self.root);

        // write beside the target then persist so readers never see a partial object
        let mut temp = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| EtlError::storage("put", key, format!("tempfile: {e}")))?;
        temp.write_all(&body)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| EtlError::storage("put", key, e))?;
        temp.persist(&path)
            .map_err(|e| EtlError::storage("put", key, format!("persist: {e}")))?;
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), EtlError> {
        let from = self.path_for("copy", src)?;
        let to = self.path_for("copy", dst)?;
        Self::ensure_parent("copy", dst, &to)?;
        fs::copy(&from, &to)
            .map(|_| ())
            .map_err(|e| EtlError::storage("copy", src, format!("to {dst}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), EtlError> {
        let path = self.path_for("delete", key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EtlError::storage("delete", key, e))
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, EtlError> {
        let path = self.path_for("exists", key)?;
        Ok(path.is_file())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), EtlError> {
        let from = self.path_for("rename", src)?;
        let to = self.path_for("rename", dst)?;
        Self::ensure_parent("rename", dst, &to)?;
        fs::rename(&from, &to)
            .map_err(|e| EtlError::storage("rename", src, format!("to {dst}: {e}")))
    }
}

///
/// In-process store, used for --dry-run and by tests
///
#[derive(Default)]
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Self {
        Self { bucket: bucket.to_string(), objects: Mutex::default() }
    }

    fn with_objects<T>(
        &self,
        op: &'static str,
        key: &str,
        f: impl FnOnce(&mut BTreeMap<String, Vec<u8>>) -> Result<T, EtlError>
    ) -> Result<T, EtlError> {
        let mut objects = self.objects.lock()
            .map_err(|_| EtlError::storage(op, key, "store lock poisoned"))?;
        f(&mut objects)
    }

    /// Every key in the bucket
    pub fn keys(&self) -> Vec<String> {
        self.with_objects("keys", "", |objects| Ok(objects.keys().cloned().collect()))
            .unwrap_or_default()
    }

    /// Copies every object under `prefix` out of `source`, returns the count
    pub async fn seed_from(&self, source: &dyn ObjectStore, prefix: &str) ->
        Result<usize, EtlError> {
        let keys = source.list(prefix).await?;
        for key in &keys {
            let body = source.get(key).await?;
            self.put(key, body).await?;
        }
        Ok(keys.len())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
        self.with_objects("list", prefix, |objects| {
            Ok(objects.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, EtlError> {
        self.with_objects("get", key, |objects| {
            objects.get(key)
                .cloned()
                .ok_or_else(|| EtlError::storage("get", key, "no such key"))
        })
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), EtlError> {
        self.with_objects("put", key, |objects| {
            objects.insert(key.to_string(), body);
            Ok(())
        })
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), EtlError> {
        self.with_objects("copy", src, |objects| {
            let body = objects.get(src)
                .cloned()
                .ok_or_else(|| EtlError::storage("copy", src, "no such key"))?;
            objects.insert(dst.to_string(), body);
            Ok(())
        })
    }

    async fn delete(&self, key: &str) -> Result<(), EtlError> {
        self.with_objects("delete", key, |objects| {
            objects.remove(key);
            Ok(())
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, EtlError> {
        self.with_objects("exists", key, |objects| Ok(objects.contains_key(key)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Wraps a store and fails the chosen operation once it is reached
    pub(crate) struct FaultyStore {
        pub(crate) inner: MemoryStore,
        fail_op: &'static str,
        fail_key_prefix: &'static str,
        pub(crate) writes: Mutex<Vec<String>>
    }

    impl FaultyStore {
        pub(crate) fn new(fail_op: &'static str, fail_key_prefix: &'static str) -> Self {
            Self {
                inner: MemoryStore::new("bucket"),
                fail_op,
                fail_key_prefix,
                writes: Mutex::default()
            }
        }

        fn check(&self, op: &'static str, key: &str) -> Result<(), EtlError> {
            if op == self.fail_op && key.starts_with(self.fail_key_prefix) {
                return Err(EtlError::storage(op, key, "injected failure"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ObjectStore for FaultyStore {
        fn bucket(&self) -> &str { self.inner.bucket() }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, EtlError> {
            self.check("list", prefix)?;
            self.inner.list(prefix).await
        }
        async fn get(&self, key: &str) -> Result<Vec<u8>, EtlError> {
            self.check("get", key)?;
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), EtlError> {
            self.check("put", key)?;
            self.writes.lock().unwrap().push(key.to_string());
            self.inner.put(key, body).await
        }
        async fn copy(&self, src: &str, dst: &str) -> Result<(), EtlError> {
            self.check("copy", src)?;
            self.inner.copy(src, dst).await
        }
        async fn delete(&self, key: &str) -> Result<(), EtlError> {
            self.check("delete", key)?;
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, EtlError> {
            self.inner.exists(key).await
        }
    }

    fn disk(dir: &tempfile::TempDir) -> DiskStore {
        DiskStore::open(&StorageConfig {
            bucket: "bucket".to_string(),
            root: dir.path().to_path_buf()
        }).unwrap()
    }

    #[test]
    fn base_name_takes_last_segment() {
        assert_eq!(base_name("raw_data/to_processed/a.json"), "a.json");
        assert_eq!(base_name("a.json"), "a.json");
    }

    #[tokio::test]
    async fn disk_put_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk(&dir);

        store.put("raw_data/to_processed/b.json", b"{}".to_vec()).await.unwrap();
        store.put("raw_data/to_processed/a.json", b"[]".to_vec()).await.unwrap();
        store.put("transformed_data/songs_data/s.csv", b"x".to_vec()).await.unwrap();

        assert!(dir.path().join("bucket/raw_data/to_processed/a.json").is_file());
        assert_eq!(store.get("raw_data/to_processed/a.json").await.unwrap(), b"[]");
        assert_eq!(
            store.list("raw_data/to_processed/").await.unwrap(),
            vec!["raw_data/to_processed/a.json", "raw_data/to_processed/b.json"]
        );
        assert!(store.list("raw_data/processed_data/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disk_list_walks_only_the_prefix_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk(&dir);
        store.put("raw_data/to_processed/a.json", b"{}".to_vec()).await.unwrap();
        store.put("raw_data/to_processed/ab.json", b"{}".to_vec()).await.unwrap();
        store.put("raw_data/processed_data/a.json", b"{}".to_vec()).await.unwrap();

        assert!(store.list("transformed_data/songs_data/").await.unwrap().is_empty());
        assert_eq!(
            store.list("raw_data/to_processed/ab").await.unwrap(),
            vec!["raw_data/to_processed/ab.json"]
        );
        assert_eq!(store.list("raw_data/").await.unwrap().len(), 3);
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn disk_rename_moves_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk(&dir);
        store.put("raw_data/to_processed/a.json", b"{}".to_vec()).await.unwrap();

        store.rename("raw_data/to_processed/a.json", "raw_data/processed_data/a.json")
            .await
            .unwrap();

        assert!(!store.exists("raw_data/to_processed/a.json").await.unwrap());
        assert!(store.exists("raw_data/processed_data/a.json").await.unwrap());
    }

    #[tokio::test]
    async fn disk_copy_keeps_source_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk(&dir);
        store.put("a/x.json", b"1".to_vec()).await.unwrap();

        store.copy("a/x.json", "b/x.json").await.unwrap();
        assert!(store.exists("a/x.json").await.unwrap());
        assert_eq!(store.get("b/x.json").await.unwrap(), b"1");

        store.delete("a/x.json").await.unwrap();
        store.delete("a/x.json").await.unwrap();
        assert!(!store.exists("a/x.json").await.unwrap());
    }

    #[tokio::test]
    async fn disk_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk(&dir);
        assert!(store.put("../escape.json", b"{}".to_vec()).await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn disk_get_missing_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk(&dir);
        let err = store.get("raw_data/none.json").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Storage);
    }

    #[tokio::test]
    async fn memory_seeds_from_disk_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk(&dir);
        store.put("raw_data/to_processed/a.json", b"{}".to_vec()).await.unwrap();
        store.put("transformed_data/songs_data/s.csv", b"x".to_vec()).await.unwrap();

        let scratch = MemoryStore::new("bucket");
        assert_eq!(scratch.seed_from(&store, "raw_data/").await.unwrap(), 1);
        assert_eq!(scratch.keys(), vec!["raw_data/to_processed/a.json"]);
        assert_eq!(scratch.get("raw_data/to_processed/a.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn memory_default_rename_is_copy_then_delete() {
        let store = MemoryStore::new("bucket");
        store.put("p/a.json", b"{}".to_vec()).await.unwrap();
        store.rename("p/a.json", "q/a.json").await.unwrap();
        assert_eq!(store.keys(), vec!["q/a.json"]);
        assert!(store.rename("p/a.json", "q/b.json").await.is_err());
    }
}
