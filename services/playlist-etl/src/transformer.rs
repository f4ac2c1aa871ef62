//!
//! src/transformer.rs  Andrew Belles  Sept 14th, 2025
//!
//! Consumes every pending raw snapshot: projects it onto the three
//! tables, writes the csv output and archives the raw object
//!

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{PROCESSED_DATA_PATH, RAW_DATA_PATH};
use crate::errors::EtlError;
use crate::storage::{base_name, ObjectStore};
use crate::transform::{decode_snapshot, project, to_csv, Projection, Table};
use crate::types::PlaylistSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformSummary {
    NoFiles,
    Processed {
        files: usize,
        // archived by an earlier run whose delete failed
        already_archived: usize
    }
}

///
/// `<name>_transformed_<YYYYMMDD_HHMMSS>.csv`, with `_<seq>` appended for
/// every snapshot after the first in one run so names never collide
///
pub fn transformed_file_name(name: &str, at: DateTime<Utc>, seq: usize) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S");
    if seq == 0 {
        format!("{name}_transformed_{stamp}.csv")
    } else {
        format!("{name}_transformed_{stamp}_{seq}.csv")
    }
}

pub fn archive_key(key: &str) -> String {
    format!("{PROCESSED_DATA_PATH}{}", base_name(key))
}

/// Prefixes data-shape errors with the raw object they came from
fn in_object(key: &str, err: EtlError) -> EtlError {
    match err {
        EtlError::Parse(message) => EtlError::Parse(format!("{key}: {message}")),
        other => other
    }
}

pub struct Transformer {
    store: Arc<dyn ObjectStore>
}

impl Transformer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Pending `.json` keys under the raw prefix
    pub async fn discover(&self) -> Result<Vec<String>, EtlError> {
        let keys = self.store.list(RAW_DATA_PATH).await
            .inspect_err(|e| error!(error = %e, prefix = RAW_DATA_PATH, "storage.error"))?;
        Ok(keys.into_iter().filter(|k| k.ends_with(".json")).collect())
    }

    async fn write_table<T: Table>(
        &self,
        rows: &[T],
        at: DateTime<Utc>,
        seq: usize
    ) -> Result<String, EtlError> {
        let key = format!("{}{}", T::PATH, transformed_file_name(T::NAME, at, seq));
        let body = to_csv(rows)?;
        self.store.put(&key, body).await
            .inspect_err(|e| error!(error = %e, table = T::NAME, "transform.write.error"))?;
        debug!(key = %key, rows = rows.len(), "transform.write");
        Ok(key)
    }

    /// Songs, then albums, then artists. Stops at the first failed write.
    async fn write_tables(
        &self,
        projection: &Projection,
        at: DateTime<Utc>,
        seq: usize
    ) -> Result<(), EtlError> {
        self.write_table(&projection.songs, at, seq).await?;
        self.write_table(&projection.albums, at, seq).await?;
        self.write_table(&projection.artists, at, seq).await?;
        Ok(())
    }

    async fn archive(&self, key: &str) -> Result<(), EtlError> {
        let dst = archive_key(key);
        self.store.rename(key, &dst).await
            .inspect_err(|e| error!(error = %e, key, "transform.archive.error"))?;
        info!(from = key, to = %dst, "transform.archive");
        Ok(())
    }

    pub async fn run(&self, at: DateTime<Utc>) -> Result<TransformSummary, EtlError> {
        let keys = self.discover().await?;
        if keys.is_empty() {
            info!("transform.no_files");
            return Ok(TransformSummary::NoFiles);
        }
        info!(pending = keys.len(), "transform.start");

        // read and decode everything before the first write
        let mut already_archived = 0_usize;
        let mut batch: Vec<(String, PlaylistSnapshot)> = Vec::with_capacity(keys.len());
        for key in keys {
            let archived = archive_key(&key);
            let seen = self.store.exists(&archived).await
                .inspect_err(|e| error!(error = %e, key = %archived, "storage.error"))?;
            if seen {
                warn!(key = %key, "transform.already_archived");
                self.store.delete(&key).await
                    .inspect_err(|e| error!(error = %e, key = %key, "storage.error"))?;
                already_archived += 1;
                continue;
            }

            let bytes = self.store.get(&key).await
                .inspect_err(|e| error!(error = %e, key = %key, "storage.error"))?;
            let snapshot = decode_snapshot(&bytes).map_err(|e| in_object(&key, e))?;
            batch.push((key, snapshot));
        }

        for (seq, (key, snapshot)) in batch.iter().enumerate() {
            let projection = project(snapshot).map_err(|e| in_object(key, e))?;
            info!(
                key = %key,
                songs = projection.songs.len(),
                albums = projection.albums.len(),
                artists = projection.artists.len(),
                "transform.project"
            );
            self.write_tables(&projection, at, seq).await?;
            self.archive(key).await?;
        }

        let files = batch.len() + already_archived;
        info!(files, already_archived, "transform.done");
        Ok(TransformSummary::Processed { files, already_archived })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::Value;

    use super::*;
    use crate::config::{ALBUMS_PATH, ARTISTS_PATH, SONGS_PATH};
    use crate::errors::ErrorKind;
    use crate::storage::{tests::FaultyStore, MemoryStore};
    use crate::transform::tests::{item, snapshot_json};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 14, 8, 30, 5).unwrap()
    }

    fn raw(items: Vec<Value>) -> Vec<u8> {
        serde_json::to_vec(&snapshot_json(items)).unwrap()
    }

    fn two_items() -> Vec<u8> {
        raw(vec![
            item("s1", "alb1", "2019", &["a1"], "2024-01-02T00:00:00Z"),
            item("s2", "alb1", "2019", &["a2"], "2024-01-03T00:00:00Z"),
        ])
    }

    async fn seed(store: &dyn ObjectStore, name: &str, body: Vec<u8>) -> String {
        let key = format!("{RAW_DATA_PATH}{name}");
        store.put(&key, body).await.unwrap();
        key
    }

    fn keys_under(store: &MemoryStore, prefix: &str) -> Vec<String> {
        store.keys().into_iter().filter(|k| k.starts_with(prefix)).collect()
    }

    #[test]
    fn file_names() {
        assert_eq!(
            transformed_file_name("songs", at(), 0),
            "songs_transformed_20250914_083005.csv"
        );
        assert_eq!(
            transformed_file_name("albums", at(), 2),
            "albums_transformed_20250914_083005_2.csv"
        );
        assert_eq!(
            archive_key("raw_data/to_processed/spotify_raw_1.json"),
            "raw_data/processed_data/spotify_raw_1.json"
        );
    }

    #[tokio::test]
    async fn no_pending_files_is_success_without_writes() {
        let store = Arc::new(MemoryStore::new("bucket"));
        store.put("raw_data/to_processed/notes.txt", b"hi".to_vec()).await.unwrap();

        let summary = Transformer::new(store.clone()).run(at()).await.unwrap();
        assert_eq!(summary, TransformSummary::NoFiles);
        assert_eq!(store.keys(), vec!["raw_data/to_processed/notes.txt"]);
    }

    #[tokio::test]
    async fn writes_three_tables_and_archives() {
        let store = Arc::new(MemoryStore::new("bucket"));
        seed(store.as_ref(), "spotify_raw_1.json", two_items()).await;

        let summary = Transformer::new(store.clone()).run(at()).await.unwrap();
        assert_eq!(summary, TransformSummary::Processed { files: 1, already_archived: 0 });

        assert!(keys_under(&store, RAW_DATA_PATH).is_empty());
        assert_eq!(
            keys_under(&store, PROCESSED_DATA_PATH),
            vec!["raw_data/processed_data/spotify_raw_1.json"]
        );

        let songs = store.get(&format!("{SONGS_PATH}songs_transformed_20250914_083005.csv"))
            .await.unwrap();
        assert_eq!(String::from_utf8(songs).unwrap().lines().count(), 3);

        let albums = store.get(&format!("{ALBUMS_PATH}albums_transformed_20250914_083005.csv"))
            .await.unwrap();
        assert_eq!(String::from_utf8(albums).unwrap().lines().count(), 2);

        let artists = store.get(&format!("{ARTISTS_PATH}artists_transformed_20250914_083005.csv"))
            .await.unwrap();
        assert_eq!(String::from_utf8(artists).unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn several_snapshots_do_not_collide() {
        let store = Arc::new(MemoryStore::new("bucket"));
        seed(store.as_ref(), "spotify_raw_1.json", two_items()).await;
        seed(store.as_ref(), "spotify_raw_2.json", two_items()).await;

        let summary = Transformer::new(store.clone()).run(at()).await.unwrap();
        assert_eq!(summary, TransformSummary::Processed { files: 2, already_archived: 0 });
        assert_eq!(keys_under(&store, SONGS_PATH).len(), 2);
        assert_eq!(keys_under(&store, ALBUMS_PATH).len(), 2);
        assert_eq!(keys_under(&store, ARTISTS_PATH).len(), 2);
        assert_eq!(keys_under(&store, PROCESSED_DATA_PATH).len(), 2);
    }

    #[tokio::test]
    async fn undecodable_object_fails_before_any_write() {
        let store = Arc::new(MemoryStore::new("bucket"));
        seed(store.as_ref(), "spotify_raw_1.json", two_items()).await;
        seed(store.as_ref(), "spotify_raw_2.json", b"{ not json".to_vec()).await;

        let err = Transformer::new(store.clone()).run(at()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataShape);
        assert!(err.to_string().contains("spotify_raw_2.json"));
        assert_eq!(keys_under(&store, RAW_DATA_PATH).len(), 2);
        assert!(keys_under(&store, "transformed_data/").is_empty());
    }

    #[tokio::test]
    async fn bad_date_leaves_earlier_snapshots_archived() {
        let store = Arc::new(MemoryStore::new("bucket"));
        seed(store.as_ref(), "spotify_raw_1.json", two_items()).await;
        let bad = raw(vec![item("s9", "alb9", "someday", &["a9"], "2024-01-02T00:00:00Z")]);
        seed(store.as_ref(), "spotify_raw_2.json", bad).await;

        let err = Transformer::new(store.clone()).run(at()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataShape);
        assert_eq!(
            keys_under(&store, PROCESSED_DATA_PATH),
            vec!["raw_data/processed_data/spotify_raw_1.json"]
        );
        assert_eq!(
            keys_under(&store, RAW_DATA_PATH),
            vec!["raw_data/to_processed/spotify_raw_2.json"]
        );
    }

    #[tokio::test]
    async fn failed_write_stops_remaining_tables() {
        let store = Arc::new(FaultyStore::new("put", ALBUMS_PATH));
        seed(store.as_ref(), "spotify_raw_1.json", two_items()).await;

        let err = Transformer::new(store.clone()).run(at()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        let writes = store.writes.lock().unwrap().clone();
        assert!(writes.iter().any(|k| k.starts_with(SONGS_PATH)));
        assert!(!writes.iter().any(|k| k.starts_with(ARTISTS_PATH)));
        // raw object stays pending
        assert_eq!(keys_under(&store.inner, RAW_DATA_PATH).len(), 1);
    }

    #[tokio::test]
    async fn failed_delete_leaves_duplicate_and_rerun_skips_transform() {
        let store = Arc::new(FaultyStore::new("delete", RAW_DATA_PATH));
        let key = seed(store.as_ref(), "spotify_raw_1.json", two_items()).await;

        let err = Transformer::new(store.clone()).run(at()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(store.inner.exists(&key).await.unwrap());
        assert!(store.inner.exists(&archive_key(&key)).await.unwrap());
        let songs_before = keys_under(&store.inner, SONGS_PATH).len();
        assert_eq!(songs_before, 1);

        // backend recovers, next invocation only finishes the move
        let healed = Arc::new(MemoryStore::new("bucket"));
        for k in store.inner.keys() {
            healed.put(&k, store.inner.get(&k).await.unwrap()).await.unwrap();
        }
        let later = Utc.with_ymd_and_hms(2025, 9, 14, 9, 0, 0).unwrap();
        let summary = Transformer::new(healed.clone()).run(later).await.unwrap();

        assert_eq!(summary, TransformSummary::Processed { files: 1, already_archived: 1 });
        assert!(!healed.exists(&key).await.unwrap());
        assert_eq!(keys_under(&healed, SONGS_PATH).len(), songs_before);
    }

    #[tokio::test]
    async fn list_failure_is_storage_error() {
        let store = Arc::new(FaultyStore::new("list", RAW_DATA_PATH));
        let err = Transformer::new(store).run(at()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn runs_against_disk_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::storage::DiskStore::open(&crate::config::StorageConfig {
            bucket: "bucket".to_string(),
            root: dir.path().to_path_buf()
        }).unwrap());
        seed(store.as_ref(), "spotify_raw_1.json", two_items()).await;

        let summary = Transformer::new(store.clone()).run(at()).await.unwrap();
        assert_eq!(summary, TransformSummary::Processed { files: 1, already_archived: 0 });
        assert!(dir.path().join("bucket/raw_data/processed_data/spotify_raw_1.json").is_file());
        assert!(!dir.path().join("bucket/raw_data/to_processed/spotify_raw_1.json").exists());
        assert!(dir.path()
            .join("bucket/transformed_data/artist_data/artists_transformed_20250914_083005.csv")
            .is_file());
    }
}
