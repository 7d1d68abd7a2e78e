//! # Delta Engine
//!
//! Turns a device's absolute per-track play counters into the plays that
//! happened since the last sync.
//!
//! ## Counting
//!
//! ```text
//! new_plays = min(recent_play_count, play_count - previous), clamped at 0
//! ```
//!
//! `play_count - previous` is the only figure that is monotonic across our
//! own syncs. Another tool resetting the device's recent counter in the
//! meantime would make it over-count, so it is capped by the recent counter.
//! A lifetime counter that went backwards (device restore) yields nothing.
//!
//! Each new play becomes one copy of the track's [`TrackRecord`]. All copies
//! share the device's last-played time; the hardware keeps no per-play
//! history.

use crate::error::Result;
use crate::policy::ScrobblePolicy;
use bridge_traits::{DeviceTrack, TrackRecord, TrackSource};
use core_cache::{format_persistent_id, CounterEntry, PlaycountStore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Plays since the last sync for one track.
///
/// ```
/// use core_sync::delta::new_plays;
///
/// assert_eq!(new_plays(2, 13, 10), 2);
/// assert_eq!(new_plays(5, 40, 50), 0);
/// ```
pub fn new_plays(recent_play_count: u32, play_count: u32, previous: u32) -> u32 {
    if play_count <= previous {
        return 0;
    }
    recent_play_count.min(play_count - previous)
}

/// Map a device track onto the shared record shape.
pub fn normalize(track: &DeviceTrack) -> TrackRecord {
    TrackRecord {
        artist: track.artist.clone(),
        title: track.title.clone(),
        album: track.album.clone(),
        album_artist: track.album_artist.clone(),
        duration_secs: track.track_length_ms / 1000,
        timestamp: TrackRecord::timestamp_from_unix(track.last_played),
        podcast: track.media_type.is_podcast(),
        video: track.media_type.is_video(),
        source: TrackSource::MediaDevice,
        play_count: 1,
        location: track.location.clone(),
    }
}

/// Which counters the cache should advance to after a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineScope {
    /// Every track that was read, whatever happened to its plays.
    All,
    /// Only tracks with no pending plays, so unreported plays are found again
    /// on the next mount.
    SettledOnly,
}

/// Delta result for one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDelta {
    /// Counter to persist: the device's current lifetime count
    pub entry: CounterEntry,
    pub record: TrackRecord,
    pub new_plays: u32,
}

/// Delta result for a whole device.
#[derive(Debug, Clone, Default)]
pub struct DeviceDelta {
    pub tracks: Vec<TrackDelta>,
    /// `false` when reading stopped early on cancellation
    pub complete: bool,
}

impl DeviceDelta {
    /// Sum of new plays before any filtering.
    pub fn total_new_plays(&self) -> u64 {
        self.tracks.iter().map(|t| u64::from(t.new_plays)).sum()
    }

    /// Number of plays that pass the policy filter, without building records.
    pub fn eligible_plays(&self, policy: &ScrobblePolicy) -> u64 {
        self.tracks
            .iter()
            .filter(|t| t.new_plays > 0 && policy.is_eligible(&t.record))
            .map(|t| u64::from(t.new_plays))
            .sum()
    }

    /// Eligible plays, one record per play, stable-sorted by timestamp.
    ///
    /// Allocates one record per play; check [`Self::eligible_plays`]
    /// against the anomaly threshold first.
    pub fn candidates(&self, policy: &ScrobblePolicy) -> Vec<TrackRecord> {
        let mut candidates: Vec<TrackRecord> = self
            .tracks
            .iter()
            .filter(|t| t.new_plays > 0 && policy.is_eligible(&t.record))
            .flat_map(|t| std::iter::repeat(t.record.clone()).take(t.new_plays as usize))
            .collect();
        sort_chronologically(&mut candidates);
        candidates
    }

    /// Counter rows to persist for `scope`.
    pub fn baseline(&self, scope: BaselineScope) -> Vec<CounterEntry> {
        self.tracks
            .iter()
            .filter(|t| scope == BaselineScope::All || t.new_plays == 0)
            .map(|t| t.entry.clone())
            .collect()
    }
}

/// Stable sort on timestamp.
pub fn sort_chronologically(tracks: &mut [TrackRecord]) {
    tracks.sort_by_key(|t| t.timestamp);
}

/// Run the delta engine over `tracks` against the device's cache.
///
/// Stops between tracks once `cancel` fires and marks the result
/// incomplete; tracks already read are kept.
pub async fn compute_delta(
    tracks: &[DeviceTrack],
    store: &dyn PlaycountStore,
    cancel: &CancellationToken,
) -> Result<DeviceDelta> {
    let mut delta = DeviceDelta {
        tracks: Vec::with_capacity(tracks.len()),
        complete: true,
    };

    for track in tracks {
        if cancel.is_cancelled() {
            debug!(read = delta.tracks.len(), "Delta computation cancelled");
            delta.complete = false;
            break;
        }

        let persistent_id = format_persistent_id(track.persistent_id);
        let previous = store.lookup(&persistent_id).await?;
        let plays = new_plays(track.recent_play_count, track.play_count, previous);

        let record = normalize(track);
        delta.tracks.push(TrackDelta {
            entry: CounterEntry {
                persistent_id,
                path: record.unique_id(),
                play_count: track.play_count,
            },
            record,
            new_plays: plays,
        });
    }

    debug!(
        tracks = delta.tracks.len(),
        new_plays = delta.total_new_plays(),
        "Delta computed"
    );
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::MediaType;
    use core_cache::SqlitePlaycountCache;
    use core_runtime::config::{DeviceScrobbleConfig, FeatureFlags};

    fn track(id: u64, artist: &str, last_played: i64, recent: u32, total: u32) -> DeviceTrack {
        DeviceTrack {
            persistent_id: id,
            artist: Some(artist.to_string()),
            title: Some(format!("Song {}", id)),
            album: Some("Album".to_string()),
            album_artist: None,
            track_length_ms: 215_900,
            last_played,
            media_type: MediaType::AUDIO,
            recent_play_count: recent,
            play_count: total,
            location: None,
        }
    }

    fn policy() -> ScrobblePolicy {
        ScrobblePolicy::from_config(&DeviceScrobbleConfig::default(), &FeatureFlags::default())
    }

    #[test]
    fn test_new_plays_examples() {
        assert_eq!(new_plays(2, 13, 10), 2);
        assert_eq!(new_plays(5, 40, 50), 0);
        assert_eq!(new_plays(3, 3, 0), 3);
        assert_eq!(new_plays(7, 3, 0), 3);
        assert_eq!(new_plays(4, 10, 10), 0);
        assert_eq!(new_plays(0, 12, 10), 0);
    }

    #[test]
    fn test_normalize() {
        let mut t = track(1, "A", 1_700_000_000, 1, 1);
        t.media_type = MediaType::MOVIE | MediaType::MUSIC_VIDEO;
        let record = normalize(&t);

        assert_eq!(record.duration_secs, 215);
        assert_eq!(record.timestamp.timestamp(), 1_700_000_000);
        assert!(!record.video);
        assert!(!record.podcast);
        assert_eq!(record.unique_id(), "A\tSong 1\tAlbum");

        t.media_type = MediaType::TV_SHOW;
        assert!(normalize(&t).video);
        t.media_type = MediaType::AUDIO | MediaType::PODCAST;
        assert!(normalize(&t).podcast);
    }

    #[tokio::test]
    async fn test_compute_delta_replicates_and_sorts() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        cache
            .upsert_all(&[CounterEntry::new(1, "", 10)])
            .await
            .unwrap();

        let tracks = vec![
            track(1, "Late", 300, 2, 13),
            track(2, "Early", 100, 1, 1),
            track(3, "Unplayed", 200, 0, 0),
        ];

        let delta = compute_delta(&tracks, &cache, &CancellationToken::new())
            .await
            .unwrap();
        assert!(delta.complete);
        assert_eq!(delta.total_new_plays(), 3);

        let candidates = delta.candidates(&policy());
        let artists: Vec<_> = candidates
            .iter()
            .map(|r| r.artist.clone().unwrap())
            .collect();
        assert_eq!(artists, vec!["Early", "Late", "Late"]);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        let tracks = vec![track(1, "A", 100, 4, 4), track(2, "B", 200, 1, 9)];

        let first = compute_delta(&tracks, &cache, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.candidates(&policy()).len(), 5);
        cache
            .upsert_all(&first.baseline(BaselineScope::All))
            .await
            .unwrap();

        let second = compute_delta(&tracks, &cache, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.total_new_plays(), 0);
        assert!(second.candidates(&policy()).is_empty());
    }

    #[tokio::test]
    async fn test_filtered_tracks_still_reach_baseline() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        let mut video = track(1, "V", 100, 2, 2);
        video.media_type = MediaType::MOVIE;
        let mut anonymous = track(2, "", 100, 1, 1);
        anonymous.artist = None;

        let delta = compute_delta(&[video, anonymous], &cache, &CancellationToken::new())
            .await
            .unwrap();
        assert!(delta.candidates(&policy()).is_empty());
        assert_eq!(delta.baseline(BaselineScope::All).len(), 2);
    }

    #[tokio::test]
    async fn test_titleless_track_is_not_a_candidate() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        let mut untitled = track(1, "A", 100, 2, 2);
        untitled.title = None;

        let tracks = vec![untitled, track(2, "B", 200, 1, 1)];

        let delta = compute_delta(&tracks, &cache, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(delta.eligible_plays(&policy()), 1);
        let candidates = delta.candidates(&policy());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].artist.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_eligible_plays_counts_without_materializing() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        let mut video = track(3, "V", 100, 5, 5);
        video.media_type = MediaType::MOVIE;
        let tracks = vec![
            track(1, "A", 100, u32::MAX, u32::MAX),
            track(2, "B", 100, u32::MAX, u32::MAX),
            video,
        ];

        let delta = compute_delta(&tracks, &cache, &CancellationToken::new())
            .await
            .unwrap();
        let eligible = delta.eligible_plays(&policy());
        assert_eq!(eligible, 2 * u64::from(u32::MAX));
        assert!(policy().is_anomalous(eligible));
    }

    #[tokio::test]
    async fn test_settled_only_baseline_skips_pending_tracks() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        let tracks = vec![track(1, "A", 100, 2, 2), track(2, "B", 100, 0, 5)];
        cache
            .upsert_all(&[CounterEntry::new(2, "", 5)])
            .await
            .unwrap();

        let delta = compute_delta(&tracks, &cache, &CancellationToken::new())
            .await
            .unwrap();
        let settled = delta.baseline(BaselineScope::SettledOnly);
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].persistent_id, "2");
    }

    #[tokio::test]
    async fn test_cancelled_delta_is_incomplete() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let delta = compute_delta(&[track(1, "A", 1, 1, 1)], &cache, &cancel)
            .await
            .unwrap();
        assert!(!delta.complete);
        assert!(delta.tracks.is_empty());
    }

    #[test]
    fn test_sort_is_stable() {
        let t = TrackRecord::timestamp_from_unix;
        let mut records = vec![
            TrackRecord::new("B", "1", t(20)),
            TrackRecord::new("A", "1", t(10)),
            TrackRecord::new("C", "1", t(20)),
        ];
        sort_chronologically(&mut records);
        let order: Vec<_> = records.iter().map(|r| r.artist.clone().unwrap()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }
}
