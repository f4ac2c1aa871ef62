use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

///
/// Shape of a playlist-tracks response, limited to the fields the
/// projections read. Everything else in the raw json is ignored here
/// but preserved in the stored snapshot.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub items: Vec<TrackItem>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackItem {
    pub added_at: String,
    // null for tracks removed from the catalogue
    pub track: Option<Track>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub duration_ms: u64,
    pub popularity: u32,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub album: Album,
    pub artists: Vec<Artist>
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: Option<String>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub release_date: String,
    pub total_tracks: u32,
    #[serde(default)]
    pub external_urls: ExternalUrls
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls
}

/// One row per playlist entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongRecord {
    pub song_id: String,
    pub song_name: String,
    pub duration_ms: u64,
    pub url: Option<String>,
    pub popularity: u32,
    #[serde(serialize_with = "crate::dates::serialize_utc")]
    pub song_added: DateTime<Utc>,
    pub album_id: String,
    pub artist_id: String
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumRecord {
    pub album_id: String,
    pub name: String,
    #[serde(serialize_with = "crate::dates::serialize_utc")]
    pub release_date: DateTime<Utc>,
    pub total_tracks: u32,
    pub url: Option<String>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistRecord {
    pub artist_id: String,
    pub artist_name: String,
    pub external_url: Option<String>
}
