//! Play Record: the canonical in-memory representation of one play event (§3).

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

/// The track/listen-shaped payload of a play.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayData {
    /// Ordered artist names (may be empty).
    pub artists: Vec<String>,
    /// Ordered album-artist names (may be empty).
    pub album_artists: Vec<String>,
    /// Album title, if known.
    pub album: Option<String>,
    /// Track title. Required.
    pub track: String,
    /// Track duration, if known.
    pub duration: Option<Duration>,
    /// Instant the play started, if known.
    pub play_date: Option<DateTime<Utc>>,
    /// Seconds actually listened, if reported by the upstream.
    pub listened_for: Option<Duration>,
}

/// Source-tagging and lifecycle metadata for a play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayMeta {
    /// String tag identifying the upstream source.
    pub source: String,
    /// Upstream-scoped identifier, if the source provides stable track IDs.
    pub track_id: Option<String>,
    /// Set exactly once, by the poller cycle that first observes this play.
    pub new_from_source: bool,
    /// True iff the upstream marked this as currently playing (not completed).
    pub now_playing: bool,
    /// True iff produced by a backfill path outside the hot polling loop.
    pub historical: bool,
}

/// One occurrence of a user listening to a track.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRecord {
    pub data: PlayData,
    pub meta: PlayMeta,
}

/// Identity key used by the reconciler (§4.2) to track one upstream's own
/// recent-items list across cycles.
///
/// Prefers `(source, track_id)` when the upstream provides a track ID;
/// otherwise falls back to `(track, album, artists-set)`. `artists` is
/// collected into a `BTreeSet` so that reordered artist lists still compare
/// equal, matching the spec's "artists-set" wording. This is a
/// priority-ordered key suited to matching items within a single source's
/// own list (where track_id presence is consistent across items); it is
/// *not* used for the cross-record "same play" equality in §3 — see
/// [`PlayRecord::is_same_play`], which evaluates both clauses
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlayKey {
    SourceTrackId(String, String),
    TrackAlbumArtists(String, Option<String>, BTreeSet<String>),
}

impl PlayRecord {
    /// Creates a new play record with the given track title and source tag.
    pub fn new(source: impl Into<String>, track: impl Into<String>) -> Self {
        Self {
            data: PlayData {
                artists: Vec::new(),
                album_artists: Vec::new(),
                album: None,
                track: track.into(),
                duration: None,
                play_date: None,
                listened_for: None,
            },
            meta: PlayMeta {
                source: source.into(),
                track_id: None,
                new_from_source: false,
                now_playing: false,
                historical: false,
            },
        }
    }

    #[must_use]
    pub fn with_artists(mut self, artists: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.data.artists = artists.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.data.album = Some(album.into());
        self
    }

    #[must_use]
    pub fn with_play_date(mut self, play_date: DateTime<Utc>) -> Self {
        self.data.play_date = Some(play_date);
        self
    }

    #[must_use]
    pub fn with_track_id(mut self, track_id: impl Into<String>) -> Self {
        self.meta.track_id = Some(track_id.into());
        self
    }

    #[must_use]
    pub const fn now_playing(mut self, now_playing: bool) -> Self {
        self.meta.now_playing = now_playing;
        self
    }

    /// Returns the stable key used for de-duplication (§3).
    #[must_use]
    pub fn stable_key(&self) -> PlayKey {
        if let Some(track_id) = &self.meta.track_id {
            return PlayKey::SourceTrackId(self.meta.source.clone(), track_id.clone());
        }
        PlayKey::TrackAlbumArtists(
            self.data.track.clone(),
            self.data.album.clone(),
            self.data.artists.iter().cloned().collect(),
        )
    }

    /// Returns `true` if `self` and `other` are the same play per §3 equality:
    /// `(meta.source, meta.trackId)` match, **or** `(track, album,
    /// artists-set)` match exactly. These are independent tests, not a
    /// priority order — a record carrying a `track_id` and one without can
    /// still be the same play under the second clause, so this does not
    /// simply compare [`Self::stable_key`] (which picks one test or the
    /// other per record and would miss that case).
    #[must_use]
    pub fn is_same_play(&self, other: &Self) -> bool {
        let same_track_id = match (&self.meta.track_id, &other.meta.track_id) {
            (Some(a), Some(b)) => self.meta.source == other.meta.source && a == b,
            _ => false,
        };
        if same_track_id {
            return true;
        }
        self.data.track == other.data.track
            && self.data.album == other.data.album
            && self.artists_set() == other.artists_set()
    }

    fn artists_set(&self) -> BTreeSet<&str> {
        self.data.artists.iter().map(String::as_str).collect()
    }

    /// Default validity policy (§4.1 step 2): valid iff `play_date` is
    /// present, or the record is a now-playing item (which is legitimately
    /// timestamp-less per the §3 invariant).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.data.play_date.is_some() || self.meta.now_playing
    }

    /// Validates the record, returning the drop reason on failure.
    ///
    /// # Errors
    ///
    /// Returns `Err` describing why the record is invalid per §3: missing
    /// both `play_date` and `now_playing`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.is_valid() {
            Ok(())
        } else {
            Err("missing play_date and not now_playing")
        }
    }
}
