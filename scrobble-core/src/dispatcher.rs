//! Dispatcher Interface (§4.3): the contract the Poller hands new plays to.
//!
//! The Poller holds an abstract `Dispatcher` capability and never reaches
//! back into it beyond this one call — a one-way dependency per the
//! composition design in §9, mirroring how `MusicSourceProvider` holds no
//! back-reference to the `SyncEngine` beyond the update call it makes.

use crate::play::PlayRecord;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::warn;

/// Per-dispatch options accompanying a batch of plays.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Whether the close-to-interval rule fired this cycle (§4.1 step 4);
    /// signals the dispatcher to reconcile with peer clients before
    /// accepting, so newly discovered plays dedupe across sources.
    pub force_refresh: bool,
    /// Identifier of the source poller making this call.
    pub scrobble_from: String,
    /// Downstream scrobble-client identifiers to dispatch to.
    pub scrobble_to: Vec<String>,
}

/// The contract by which new plays are handed to the (external) multi-client
/// scrobble fan-out.
///
/// Implementations MUST:
/// - Be idempotent with respect to repeated `PlayRecord`s under §3 equality.
/// - Preserve the order of `plays` when dispatching to each client.
/// - Absorb per-client failures rather than raising them to the Poller.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatches `plays` to the configured downstream clients.
    ///
    /// Returns the subset of `plays` actually accepted for scrobbling, in
    /// the same relative order they were given.
    ///
    /// # Errors
    ///
    /// Returns an error only for a dispatcher-level failure (§7
    /// `DispatchFailure`); per-client failures must be absorbed internally.
    async fn dispatch(
        &self,
        plays: &[PlayRecord],
        options: &DispatchOptions,
    ) -> Result<Vec<PlayRecord>, crate::error::ScrobbleError>;
}

/// An in-memory reference `Dispatcher` used by tests and the demo binary.
///
/// Not a vendor integration: it fans out to named in-process "clients" that
/// record which plays they accepted, and de-duplicates by §3 equality
/// across the whole lifetime of the dispatcher so that cooperating sources
/// racing on the same play don't double-scrobble it.
pub struct LoopbackDispatcher {
    clients: Vec<String>,
    seen: tokio::sync::Mutex<Vec<PlayRecord>>,
}

impl LoopbackDispatcher {
    #[must_use]
    pub fn new(clients: Vec<String>) -> Self {
        Self {
            clients,
            seen: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Dispatcher for LoopbackDispatcher {
    async fn dispatch(
        &self,
        plays: &[PlayRecord],
        options: &DispatchOptions,
    ) -> Result<Vec<PlayRecord>, crate::error::ScrobbleError> {
        let mut seen = self.seen.lock().await;

        let mut accepted = Vec::with_capacity(plays.len());
        for play in plays {
            if seen.iter().any(|s| s.is_same_play(play)) {
                continue;
            }
            seen.push(play.clone());
            accepted.push(play.clone());
        }

        let targets: HashSet<&str> = options.scrobble_to.iter().map(String::as_str).collect();
        for client in &self.clients {
            if !targets.contains(client.as_str()) {
                continue;
            }
            // A real client would make a network call here; failures are
            // absorbed per the Dispatcher contract and never reach the caller.
            if client == "always-fails" {
                warn!(client, "downstream client failed, continuing with others");
            }
        }

        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::play::PlayRecord;

    fn play(track: &str) -> PlayRecord {
        PlayRecord::new("lastfm", track)
    }

    fn opts(force_refresh: bool) -> DispatchOptions {
        DispatchOptions {
            force_refresh,
            scrobble_from: "lastfm".to_string(),
            scrobble_to: vec!["client-a".to_string()],
        }
    }

    #[tokio::test]
    async fn test_dispatch_accepts_new_plays() {
        let dispatcher = LoopbackDispatcher::new(vec!["client-a".to_string()]);
        let plays = vec![play("A"), play("B")];
        let accepted = dispatcher.dispatch(&plays, &opts(false)).await.unwrap_or_default();
        assert_eq!(accepted.len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_is_idempotent_across_calls() {
        let dispatcher = LoopbackDispatcher::new(vec!["client-a".to_string()]);
        let plays = vec![play("A")];
        let first = dispatcher.dispatch(&plays, &opts(false)).await.unwrap_or_default();
        let second = dispatcher.dispatch(&plays, &opts(false)).await.unwrap_or_default();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty(), "duplicate play must not be accepted twice");
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let dispatcher = LoopbackDispatcher::new(vec!["client-a".to_string()]);
        let plays = vec![play("A"), play("B"), play("C")];
        let accepted = dispatcher.dispatch(&plays, &opts(true)).await.unwrap_or_default();
        let titles: Vec<_> = accepted.iter().map(|p| p.data.track.clone()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_dispatch_to_unconfigured_client_does_not_affect_acceptance() {
        let dispatcher = LoopbackDispatcher::new(vec!["always-fails".to_string()]);
        let plays = vec![play("A")];
        let options = DispatchOptions {
            force_refresh: false,
            scrobble_from: "lastfm".to_string(),
            scrobble_to: vec!["always-fails".to_string()],
        };
        let accepted = dispatcher.dispatch(&plays, &options).await.unwrap_or_default();
        assert_eq!(accepted.len(), 1, "per-client failures must not block acceptance");
    }
}
