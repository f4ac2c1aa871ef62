//!
//! src/transform.rs  Andrew Belles  Sept 14th, 2025
//!
//! Projects a raw playlist snapshot onto the song, album and artist
//! tables and renders each table as csv
//!

use std::collections::HashSet;

use serde::Serialize;

use crate::config::{ALBUMS_PATH, ARTISTS_PATH, SONGS_PATH};
use crate::dates::normalize_datetime;
use crate::errors::EtlError;
use crate::types::{
    AlbumRecord, ArtistRecord, PlaylistSnapshot, SongRecord, Track, TrackItem
};

/// A csv table written under its own prefix
pub trait Table: Serialize {
    /// File name prefix, as in `<NAME>_transformed_<stamp>.csv`
    const NAME: &'static str;
    const PATH: &'static str;
    const COLUMNS: &'static [&'static str];
}

impl Table for SongRecord {
    const NAME: &'static str = "songs";
    const PATH: &'static str = SONGS_PATH;
    const COLUMNS: &'static [&'static str] = &[
        "song_id", "song_name", "duration_ms", "url",
        "popularity", "song_added", "album_id", "artist_id"
    ];
}

impl Table for AlbumRecord {
    const NAME: &'static str = "albums";
    const PATH: &'static str = ALBUMS_PATH;
    const COLUMNS: &'static [&'static str] = &[
        "album_id", "name", "release_date", "total_tracks", "url"
    ];
}

impl Table for ArtistRecord {
    const NAME: &'static str = "artists";
    const PATH: &'static str = ARTISTS_PATH;
    const COLUMNS: &'static [&'static str] = &[
        "artist_id", "artist_name", "external_url"
    ];
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub songs: Vec<SongRecord>,
    pub albums: Vec<AlbumRecord>,
    pub artists: Vec<ArtistRecord>
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<PlaylistSnapshot, EtlError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn track_of(index: usize, item: &TrackItem) -> Result<&Track, EtlError> {
    let track = item.track.as_ref()
        .ok_or_else(|| EtlError::Parse(format!("items[{index}] has no track")))?;
    if track.artists.is_empty() {
        return Err(EtlError::Parse(
            format!("items[{index}] track {} has no artists", track.id)
        ));
    }
    Ok(track)
}

/// Keeps the first record for every key, in input order
fn dedup_by_key<T>(rows: Vec<T>, key: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(key(row).to_string()))
        .collect()
}

pub fn albums(snapshot: &PlaylistSnapshot) -> Result<Vec<AlbumRecord>, EtlError> {
    let mut rows = Vec::with_capacity(snapshot.items.len());
    for (index, item) in snapshot.items.iter().enumerate() {
        let album = &track_of(index, item)?.album;
        rows.push(AlbumRecord {
            album_id: album.id.clone(),
            name: album.name.clone(),
            release_date: normalize_datetime(&album.release_date)?,
            total_tracks: album.total_tracks,
            url: album.external_urls.spotify.clone()
        });
    }
    Ok(dedup_by_key(rows, |a| a.album_id.as_str()))
}

pub fn artists(snapshot: &PlaylistSnapshot) -> Result<Vec<ArtistRecord>, EtlError> {
    let mut rows = Vec::new();
    for (index, item) in snapshot.items.iter().enumerate() {
        for artist in &track_of(index, item)?.artists {
            rows.push(ArtistRecord {
                artist_id: artist.id.clone(),
                artist_name: artist.name.clone(),
                // api link, the open.spotify.com url only when href is null
                external_url: artist.href.clone()
                    .or_else(|| artist.external_urls.spotify.clone())
            });
        }
    }
    Ok(dedup_by_key(rows, |a| a.artist_id.as_str()))
}

pub fn songs(snapshot: &PlaylistSnapshot) -> Result<Vec<SongRecord>, EtlError> {
    let mut rows = Vec::with_capacity(snapshot.items.len());
    for (index, item) in snapshot.items.iter().enumerate() {
        let track = track_of(index, item)?;
        rows.push(SongRecord {
            song_id: track.id.clone(),
            song_name: track.name.clone(),
            duration_ms: track.duration_ms,
            url: track.external_urls.spotify.clone(),
            popularity: track.popularity,
            song_added: normalize_datetime(&item.added_at)?,
            album_id: track.album.id.clone(),
            artist_id: track.artists[0].id.clone()
        });
    }
    Ok(rows)
}

pub fn project(snapshot: &PlaylistSnapshot) -> Result<Projection, EtlError> {
    Ok( Projection {
        songs: songs(snapshot)?,
        albums: albums(snapshot)?,
        artists: artists(snapshot)?
    })
}

/// Header row is always written, even for an empty table
pub fn to_csv<T: Table>(rows: &[T]) -> Result<Vec<u8>, EtlError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(T::COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner()
        .map_err(|e| EtlError::Parse(format!("csv flush: {e}")))
}
