//! A fully worked, in-memory [`SourceAdapter`] used by tests and the demo
//! binary. Not a vendor integration: its "recently played" list is whatever
//! test code or the demo pushes onto it directly.

use crate::adapter::{ReconciliationStrategy, SourceAdapter};
use crate::error::ScrobbleError;
use crate::play::PlayRecord;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// An in-memory source whose "recently played" list is pushed to directly,
/// rather than fetched from a real upstream.
///
/// Supports both reconciliation strategies: construct with
/// [`LoopbackAdapter::timestamped`] to emit records with `play_date` set (the
/// common case for most upstream APIs), or [`LoopbackAdapter::recent_window`]
/// to emit an unordered "recent items" list for the reconciler to classify.
pub struct LoopbackAdapter {
    name: String,
    strategy: ReconciliationStrategy,
    recently_played: Mutex<Vec<PlayRecord>>,
}

impl LoopbackAdapter {
    /// Creates a loopback adapter using the `Timestamped` reconciliation
    /// strategy: newness is detected by comparing `play_date`.
    #[must_use]
    pub fn timestamped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: ReconciliationStrategy::Timestamped,
            recently_played: Mutex::new(Vec::new()),
        }
    }

    /// Creates a loopback adapter using the `RecentWindow` reconciliation
    /// strategy: newness is detected by the recent-window reconciler.
    #[must_use]
    pub fn recent_window(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: ReconciliationStrategy::RecentWindow,
            recently_played: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the list the next `fetch_recently_played` call will return.
    /// For `RecentWindow` adapters this should be newest-first, matching the
    /// "recent items" shape the reconciler expects.
    pub async fn push_recently_played(&self, records: Vec<PlayRecord>) {
        *self.recently_played.lock().await = records;
    }
}

#[async_trait]
impl SourceAdapter for LoopbackAdapter {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn fetch_recently_played(&self) -> Result<Vec<PlayRecord>, ScrobbleError> {
        Ok(self.recently_played.lock().await.clone())
    }

    fn is_valid(&self, record: &PlayRecord) -> bool {
        match self.strategy {
            ReconciliationStrategy::Timestamped => record.is_valid(),
            ReconciliationStrategy::RecentWindow => record.meta.new_from_source,
        }
    }

    fn reconciliation(&self) -> ReconciliationStrategy {
        self.strategy
    }
}
