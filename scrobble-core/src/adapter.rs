//! Source adapter capability (§4.4, §9 composition).
//!
//! Replaces the original's deep inheritance (`AbstractSource` →
//! `MemorySource` → `LastfmSource`, ...) with composition: the `Poller` is
//! generic over a `SourceAdapter`, and "memory" vs "non-memory" sources are
//! a choice of [`ReconciliationStrategy`] rather than a subclass.
//!
//! Concrete vendor adapters (real Last.fm/Spotify/ListenBrainz HTTP clients)
//! are out of scope for this crate; [`crate::loopback::LoopbackAdapter`] is
//! the one fully worked, in-memory reference implementation used by tests
//! and the demo binary.

use crate::error::ScrobbleError;
use crate::play::PlayRecord;
use async_trait::async_trait;

/// Which newness-detection policy a source's recent-items API supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStrategy {
    /// The upstream reliably timestamps history items; newness is detected
    /// by comparing `play_date` against `lastTrackPlayedAt` (§4.1 step 3).
    Timestamped,
    /// The upstream's "recent items" list is unordered/untimestamped;
    /// newness is detected by the Recent-Window Reconciler (§4.2).
    RecentWindow,
}

/// Observability snapshot handed to [`SourceAdapter::on_cycle`] after a
/// completed cycle, for adapters that want to react to or log cycle
/// outcomes without the Poller depending on them for anything.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub new_play_count: usize,
    pub dispatched_count: usize,
    pub close_to_interval: bool,
}

/// The per-source capability a [`crate::poller::Poller`] is parameterized
/// over (§4.4, §9).
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// A short identifier for this source, used as `meta.source` and in
    /// logs (e.g. `"lastfm"`).
    fn source_name(&self) -> &str;

    /// Fetches the current "recently played" list, already normalized to
    /// the Play Record shape (§3). Adapters must drop or warn on malformed
    /// entries rather than fail the whole fetch, and sort oldest-first by
    /// `play_date` when timestamps exist.
    ///
    /// # Errors
    ///
    /// Returns `ScrobbleError::Fetch` on transient upstream failure; this
    /// drives the Poller's Polling → Faulted transition (§4.1).
    async fn fetch_recently_played(&self) -> Result<Vec<PlayRecord>, ScrobbleError>;

    /// Per-record validity policy (§4.1 step 2). The default policy (valid
    /// iff `play_date` is present) suits `Timestamped` adapters;
    /// `RecentWindow` adapters should override this to accept records only
    /// once the reconciler has promoted them (`meta.new_from_source`).
    fn is_valid(&self, record: &PlayRecord) -> bool {
        record.is_valid()
    }

    /// Which reconciliation strategy this adapter's upstream API requires.
    fn reconciliation(&self) -> ReconciliationStrategy {
        ReconciliationStrategy::Timestamped
    }

    /// Optional hook invoked after each completed cycle, for adapter-level
    /// observability. Never affects Poller behavior.
    async fn on_cycle(&self, _outcome: &CycleOutcome) {}
}
