//! Demo binary wiring two loopback [`scrobble_core::SourceAdapter`]s (one
//! timestamped, one recent-window) to the poller and a shared
//! [`scrobble_core::LoopbackDispatcher`].
//!
//! Not a vendor integration: the "upstream" here is a background task that
//! pushes scripted plays into each adapter on a timer, standing in for a
//! real Last.fm/Spotify/ListenBrainz client. Demonstrates the polling loop,
//! the close-to-interval delay, and cross-source dedup via the shared
//! dispatcher end to end.

use chrono::Duration as ChronoDuration;
use scrobble_core::{
    Clock, LoopbackAdapter, LoopbackDispatcher, Poller, PollerConfig, SystemClock,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let clients = vec!["demo-scrobbler".to_string()];
    let dispatcher = Arc::new(LoopbackDispatcher::new(clients.clone()));

    let timestamped = Arc::new(LoopbackAdapter::timestamped("lastfm"));
    let recent_window = Arc::new(LoopbackAdapter::recent_window("shelf-source"));

    let timestamped_poller = Arc::new(Poller::new(
        Box::new(TrackedAdapter(timestamped.clone())),
        dispatcher.clone(),
        PollerConfig {
            interval_secs: 5,
            ..PollerConfig::default()
        },
        clients.clone(),
        clock.clone(),
    ));
    let recent_window_poller = Arc::new(Poller::new(
        Box::new(TrackedAdapter(recent_window.clone())),
        dispatcher.clone(),
        PollerConfig {
            interval_secs: 5,
            ..PollerConfig::default()
        },
        clients,
        clock.clone(),
    ));

    let feed_handle = tokio::spawn(feed_demo_plays(timestamped, recent_window, clock));

    let poller_handles = vec![
        timestamped_poller.clone().start(),
        recent_window_poller.clone().start(),
    ];

    let shutdown = tokio_util::sync::CancellationToken::new();
    let ctrlc_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully");
        ctrlc_shutdown.cancel();
    }) {
        tracing::error!("failed to install Ctrl+C handler: {e}");
    }

    info!("scrobble-demo running; press Ctrl+C to stop");
    shutdown.cancelled().await;

    timestamped_poller.stop();
    recent_window_poller.stop();
    feed_handle.abort();

    for handle in poller_handles {
        let _ = handle.await;
    }

    let lastfm_status = timestamped_poller.status().await;
    let shelf_status = recent_window_poller.status().await;
    info!(
        source = %lastfm_status.source,
        tracks_discovered = lastfm_status.tracks_discovered,
        "final status"
    );
    info!(
        source = %shelf_status.source,
        tracks_discovered = shelf_status.tracks_discovered,
        "final status"
    );
}

/// Pushes a handful of scripted plays into the two demo adapters, spaced out
/// so the running pollers observe genuinely new plays across several
/// cycles rather than all at once.
async fn feed_demo_plays(
    timestamped: Arc<LoopbackAdapter>,
    recent_window: Arc<LoopbackAdapter>,
    clock: Arc<dyn Clock>,
) {
    use scrobble_core::PlayRecord;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let now = clock.now();
    timestamped
        .push_recently_played(vec![PlayRecord::new("lastfm", "Harvest Moon")
            .with_artists(["Neil Young"])
            .with_album("Harvest Moon")
            .with_play_date(now - ChronoDuration::seconds(30))])
        .await;

    // Recent-window upstream: newest-first list, no timestamps.
    recent_window
        .push_recently_played(vec![PlayRecord::new("shelf-source", "Weather")
            .with_artists(["Hikaru Utada"])])
        .await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let now = clock.now();
    timestamped
        .push_recently_played(vec![
            PlayRecord::new("lastfm", "Come Back to Me")
                .with_artists(["Hikaru Utada"])
                .with_play_date(now - ChronoDuration::seconds(10)),
            PlayRecord::new("lastfm", "Harvest Moon")
                .with_artists(["Neil Young"])
                .with_album("Harvest Moon")
                .with_play_date(now - ChronoDuration::seconds(40)),
        ])
        .await;

    // Bump: "Weather" plays again, promoted to the front of the shelf list.
    recent_window
        .push_recently_played(vec![
            PlayRecord::new("shelf-source", "Weather").with_artists(["Hikaru Utada"]),
            PlayRecord::new("shelf-source", "Sakura Drops").with_artists(["Hikaru Utada"]),
        ])
        .await;
}

/// Wraps a [`LoopbackAdapter`] to report its outcome after every cycle,
/// standing in for the per-adapter observability a real vendor adapter
/// would wire up.
struct TrackedAdapter(Arc<LoopbackAdapter>);

#[async_trait]
impl scrobble_core::adapter::SourceAdapter for TrackedAdapter {
    fn source_name(&self) -> &str {
        self.0.source_name()
    }

    async fn fetch_recently_played(
        &self,
    ) -> Result<Vec<scrobble_core::PlayRecord>, scrobble_core::ScrobbleError> {
        self.0.fetch_recently_played().await
    }

    fn is_valid(&self, record: &scrobble_core::PlayRecord) -> bool {
        self.0.is_valid(record)
    }

    fn reconciliation(&self) -> scrobble_core::adapter::ReconciliationStrategy {
        self.0.reconciliation()
    }

    async fn on_cycle(&self, outcome: &scrobble_core::adapter::CycleOutcome) {
        if outcome.new_play_count > 0 {
            info!(
                source = self.0.source_name(),
                new_plays = outcome.new_play_count,
                dispatched = outcome.dispatched_count,
                close_to_interval = outcome.close_to_interval,
                "cycle discovered new plays"
            );
        }
    }
}
