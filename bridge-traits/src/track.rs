//! Normalized play-event record shared by every device backend, the
//! confirmation port and the scrobble sink.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a record originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    #[default]
    MediaDevice,
}

impl TrackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackSource::MediaDevice => "media device",
        }
    }
}

/// One play of one track, as read from a device.
///
/// A track played three times since the last sync produces three equal
/// records; each represents a single play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    /// Duration in seconds
    pub duration_secs: u32,
    /// Last-played time reported by the device
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub podcast: bool,
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub source: TrackSource,
    /// Plays this record stands for. Always 1 for device records.
    #[serde(default = "single_play")]
    pub play_count: u32,
    /// Folder the file lives in, when the backend knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
}

fn single_play() -> u32 {
    1
}

impl TrackRecord {
    pub fn new(
        artist: impl Into<String>,
        title: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            artist: Some(artist.into()),
            title: Some(title.into()),
            album: None,
            album_artist: None,
            duration_secs: 0,
            timestamp,
            podcast: false,
            video: false,
            source: TrackSource::MediaDevice,
            play_count: 1,
            location: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, duration_secs: u32) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn podcast(mut self, podcast: bool) -> Self {
        self.podcast = podcast;
        self
    }

    pub fn video(mut self, video: bool) -> Self {
        self.video = video;
        self
    }

    /// Stable identity key: artist, title and album joined by tabs.
    ///
    /// Used where the device's own track id does not survive a re-sync.
    pub fn unique_id(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.artist.as_deref().unwrap_or_default(),
            self.title.as_deref().unwrap_or_default(),
            self.album.as_deref().unwrap_or_default()
        )
    }

    /// Artist and title are both present and non-empty.
    pub fn has_required_metadata(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        present(&self.artist) && present(&self.title)
    }

    /// Whether the record's folder is inside any of `excluded`.
    pub fn is_in_folder(&self, excluded: &[PathBuf]) -> bool {
        match &self.location {
            Some(location) => excluded
                .iter()
                .any(|folder| Path::new(location).starts_with(folder)),
            None => false,
        }
    }

    /// Convert a device "last played" value (Unix seconds) to a timestamp.
    pub fn timestamp_from_unix(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TrackRecord {
        TrackRecord::new("Boards of Canada", "Roygbiv", TrackRecord::timestamp_from_unix(1_000))
            .with_album("Music Has the Right to Children")
    }

    #[test]
    fn test_unique_id_joins_with_tabs() {
        assert_eq!(
            sample().unique_id(),
            "Boards of Canada\tRoygbiv\tMusic Has the Right to Children"
        );
    }

    #[test]
    fn test_unique_id_without_album() {
        let record = TrackRecord::new("A", "B", TrackRecord::timestamp_from_unix(0));
        assert_eq!(record.unique_id(), "A\tB\t");
    }

    #[test]
    fn test_required_metadata() {
        assert!(sample().has_required_metadata());

        let mut missing_artist = sample();
        missing_artist.artist = None;
        assert!(!missing_artist.has_required_metadata());

        let mut empty_title = sample();
        empty_title.title = Some(String::new());
        assert!(!empty_title.has_required_metadata());
    }

    #[test]
    fn test_is_in_folder() {
        let record = sample().with_location("/music/podcasts/show");
        assert!(record.is_in_folder(&[PathBuf::from("/music/podcasts")]));
        assert!(!record.is_in_folder(&[PathBuf::from("/music/rock")]));
        assert!(!sample().is_in_folder(&[PathBuf::from("/music")]));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{
            "artist": "A",
            "title": "B",
            "album": null,
            "album_artist": null,
            "duration_secs": 200,
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let record: TrackRecord = serde_json::from_str(json).unwrap();
        assert!(!record.podcast);
        assert!(!record.video);
        assert_eq!(record.source, TrackSource::MediaDevice);
        assert_eq!(record.play_count, 1);
        assert!(record.location.is_none());
    }
}
