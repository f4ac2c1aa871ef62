//!
//! src/extractor.rs  Andrew Belles  Sept 14th, 2025
//!
//! Pulls one playlist's track listing and stages the untouched
//! response as json under the to-process prefix
//!

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::RAW_DATA_PATH;
use crate::errors::EtlError;
use crate::fetch::PlaylistSource;
use crate::storage::ObjectStore;

pub fn raw_file_name(at: DateTime<Utc>) -> String {
    format!("spotify_raw_{}.json", at.format("%Y%m%d_%H%M%S_%6f"))
}

pub struct Extractor {
    source: Arc<dyn PlaylistSource>,
    store: Arc<dyn ObjectStore>,
    playlist_id: String
}

impl Extractor {
    pub fn new(
        source: Arc<dyn PlaylistSource>,
        store: Arc<dyn ObjectStore>,
        playlist_id: &str
    ) -> Self {
        Self { source, store, playlist_id: playlist_id.to_string() }
    }

    /// Returns the key the snapshot was written to
    pub async fn run(&self, at: DateTime<Utc>) -> Result<String, EtlError> {
        info!(playlist_id = %self.playlist_id, bucket = self.store.bucket(), "extract.start");

        let listing = self.source.playlist_tracks(&self.playlist_id).await?;
        if !listing.get("items").is_some_and(serde_json::Value::is_array) {
            return Err(EtlError::Parse("playlist response has no items array".to_string()));
        }
        let body = serde_json::to_vec(&listing)?;

        let key = format!("{RAW_DATA_PATH}{}", raw_file_name(at));
        let bytes = body.len();
        self.store.put(&key, body).await
            .inspect_err(|e| error!(error = %e, key = %key, "storage.error"))?;

        info!(key = %key, bytes, "extract.done");
        Ok(key)
    }
}
