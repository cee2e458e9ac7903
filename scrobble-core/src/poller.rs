//! Source Poller (§4.1): the per-source state machine that drives one
//! upstream's polling loop.

use crate::adapter::{CycleOutcome, ReconciliationStrategy, SourceAdapter};
use crate::clock::Clock;
use crate::config::PollerConfig;
use crate::dispatcher::{DispatchOptions, Dispatcher};
use crate::play::PlayRecord;
use crate::reconciler::reconcile;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which of the four states (§4.1 state machine table) the poller is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerPhase {
    Idle,
    Polling,
    Stopping,
    Faulted,
}

/// Read-only snapshot of a poller's observability counters (§6 control
/// surface): `{type, name, polling, tracksDiscovered, lastActivityAt}`.
#[derive(Debug, Clone)]
pub struct PollerStatus {
    pub source: String,
    pub phase: PollerPhase,
    pub polling: bool,
    pub tracks_discovered: u64,
    pub check_count: u32,
    pub last_track_played_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

struct PollerStatusInner {
    phase: PollerPhase,
    tracks_discovered: u64,
    check_count: u32,
    last_track_played_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
}

/// Owns and runs the polling loop for one upstream source.
pub struct Poller {
    adapter: Box<dyn SourceAdapter>,
    dispatcher: Arc<dyn Dispatcher>,
    config: PollerConfig,
    clients: Vec<String>,
    clock: Arc<dyn Clock>,
    cancel_token: CancellationToken,
    status: tokio::sync::RwLock<PollerStatusInner>,
}

impl Poller {
    #[must_use]
    pub fn new(
        adapter: Box<dyn SourceAdapter>,
        dispatcher: Arc<dyn Dispatcher>,
        config: PollerConfig,
        clients: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            adapter,
            dispatcher,
            config,
            clients,
            clock,
            cancel_token: CancellationToken::new(),
            status: tokio::sync::RwLock::new(PollerStatusInner {
                phase: PollerPhase::Idle,
                tracks_discovered: 0,
                check_count: 0,
                last_track_played_at: None,
                last_activity_at: None,
            }),
        }
    }

    /// Starts the polling loop in a background task.
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Signals the loop to stop. The loop observes this at the top of the
    /// next iteration and during its two cancellable sleeps (§5), so
    /// shutdown is prompt even mid-backoff.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Returns a snapshot of this poller's observability counters.
    pub async fn status(&self) -> PollerStatus {
        let inner = self.status.read().await;
        PollerStatus {
            source: self.adapter.source_name().to_string(),
            phase: inner.phase,
            polling: inner.phase == PollerPhase::Polling,
            tracks_discovered: inner.tracks_discovered,
            check_count: inner.check_count,
            last_track_played_at: inner.last_track_played_at,
            last_activity_at: inner.last_activity_at,
        }
    }

    async fn run(&self) {
        {
            let mut inner = self.status.write().await;
            if inner.phase == PollerPhase::Polling {
                warn!(source = self.adapter.source_name(), "start() called while already polling; ignoring");
                return;
            }
            inner.phase = PollerPhase::Polling;
        }
        info!(source = self.adapter.source_name(), "Polling started");

        let mut last_track_played_at = self.clock.now();
        let mut check_count: u32 = 0;
        let mut recently_played: Vec<PlayRecord> = Vec::new();

        loop {
            if self.cancel_token.is_cancelled() {
                self.set_phase(PollerPhase::Stopping).await;
                break;
            }

            // 1. Fetch.
            let records = match self.adapter.fetch_recently_played().await {
                Ok(records) => records,
                Err(err) => {
                    error!(source = self.adapter.source_name(), error = %err, "poller faulted during fetch");
                    self.set_phase(PollerPhase::Faulted).await;
                    return;
                }
            };

            // 2 & 3. Validate, classify, detect newness.
            let (new_plays, updated_last_played, updated_window) =
                self.classify_cycle(records, last_track_played_at, &recently_played);
            last_track_played_at = updated_last_played;
            recently_played = updated_window;

            // 4. Close-to-interval check.
            let now = self.clock.now();
            let close_to_interval = new_plays.iter().any(|p| {
                p.data
                    .play_date
                    .is_some_and(|play_date| chrono_abs(now, play_date) < self.config.close_threshold_chrono())
            });
            if close_to_interval {
                debug!(source = self.adapter.source_name(), "close to interval, delaying dispatch");
                if self.cancellable_sleep(self.config.close_delay()).await {
                    self.set_phase(PollerPhase::Stopping).await;
                    break;
                }
            }

            // 5. Dispatch.
            let options = DispatchOptions {
                force_refresh: close_to_interval,
                scrobble_from: self.adapter.source_name().to_string(),
                scrobble_to: self.clients.clone(),
            };
            let accepted = match self.dispatcher.dispatch(&new_plays, &options).await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(source = self.adapter.source_name(), error = %err, "poller faulted during dispatch");
                    self.set_phase(PollerPhase::Faulted).await;
                    return;
                }
            };

            // 7. Increment or reset checkCount (interleaved with step 5's reset).
            if new_plays.is_empty() {
                check_count = check_count.saturating_add(1);
            } else if !accepted.is_empty() {
                check_count = 0;
            }

            self.record_cycle(accepted.len(), check_count, last_track_played_at, now)
                .await;

            self.adapter
                .on_cycle(&CycleOutcome {
                    new_play_count: new_plays.len(),
                    dispatched_count: accepted.len(),
                    close_to_interval,
                })
                .await;

            // 6. Adaptive sleep.
            let sleep_time = self.compute_sleep_time(check_count, now, last_track_played_at);
            debug!(source = self.adapter.source_name(), sleep_secs = sleep_time.as_secs(), "sleeping until next cycle");
            if self.cancellable_sleep(sleep_time).await {
                self.set_phase(PollerPhase::Stopping).await;
                break;
            }
        }

        self.set_phase(PollerPhase::Idle).await;
        info!(source = self.adapter.source_name(), "Polling stopped");
    }

    /// Sleeps for `duration`, returning `true` if cancelled mid-sleep.
    async fn cancellable_sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel_token.cancelled() => true,
            () = tokio::time::sleep(duration) => false,
        }
    }

    async fn set_phase(&self, phase: PollerPhase) {
        self.status.write().await.phase = phase;
    }

    async fn record_cycle(
        &self,
        accepted_count: usize,
        check_count: u32,
        last_track_played_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let mut inner = self.status.write().await;
        inner.tracks_discovered = inner
            .tracks_discovered
            .saturating_add(u64::try_from(accepted_count).unwrap_or(u64::MAX));
        inner.check_count = check_count;
        inner.last_track_played_at = Some(last_track_played_at);
        inner.last_activity_at = Some(now);
    }

    /// Steps 2-3: validate each record and detect newness, per the
    /// reconciliation strategy the adapter declares.
    fn classify_cycle(
        &self,
        records: Vec<PlayRecord>,
        last_track_played_at: DateTime<Utc>,
        window: &[PlayRecord],
    ) -> (Vec<PlayRecord>, DateTime<Utc>, Vec<PlayRecord>) {
        match self.adapter.reconciliation() {
            ReconciliationStrategy::Timestamped => {
                let mut new_plays = Vec::new();
                let mut last = last_track_played_at;
                for mut record in records {
                    if !self.adapter.is_valid(&record) {
                        warn!(source = self.adapter.source_name(), track = %record.data.track, "dropping invalid record");
                        continue;
                    }
                    if let Some(play_date) = record.data.play_date {
                        if play_date > last {
                            record.meta.new_from_source = true;
                            last = play_date;
                            new_plays.push(record);
                        }
                    }
                }
                new_plays.sort_by_key(|p| p.data.play_date);
                (new_plays, last, Vec::new())
            }
            ReconciliationStrategy::RecentWindow => {
                let outcome = reconcile(window, &records, self.clock.as_ref(), self.config.window_size);
                let mut new_plays: Vec<PlayRecord> = outcome
                    .new_plays
                    .into_iter()
                    .filter(|p| self.adapter.is_valid(p))
                    .collect();
                new_plays.sort_by_key(|p| p.data.play_date);
                let mut last = last_track_played_at;
                for p in &new_plays {
                    if let Some(play_date) = p.data.play_date {
                        if play_date > last {
                            last = play_date;
                        }
                    }
                }
                (new_plays, last, outcome.next_window)
            }
        }
    }

    /// Step 6: adaptive sleep computation.
    fn compute_sleep_time(
        &self,
        check_count: u32,
        now: DateTime<Utc>,
        last_track_played_at: DateTime<Utc>,
    ) -> Duration {
        let interval = self.config.interval();
        let should_back_off = check_count > self.config.quiet_cycle_threshold
            && self.config.interval_secs < self.config.max_interval_secs
            && {
                let quiet_for = chrono_abs(now, last_track_played_at);
                let trigger = ChronoDuration::seconds(
                    i64::try_from(self.config.interval_secs.saturating_mul(self.config.backoff_trigger_factor))
                        .unwrap_or(i64::MAX),
                )
                .min(ChronoDuration::seconds(
                    i64::try_from(self.config.max_interval_secs).unwrap_or(i64::MAX),
                ));
                quiet_for >= trigger
            };

        if should_back_off {
            let backed_off = Duration::from_secs(self.config.interval_secs.saturating_mul(self.config.backoff_factor));
            backed_off.min(Duration::from_secs(self.config.backoff_cap_secs))
        } else {
            interval
        }
    }
}

fn chrono_abs(a: DateTime<Utc>, b: DateTime<Utc>) -> ChronoDuration {
    let diff = a - b;
    if diff < ChronoDuration::zero() {
        -diff
    } else {
        diff
    }
}

impl PollerConfig {
    fn close_threshold_chrono(&self) -> ChronoDuration {
        ChronoDuration::seconds(i64::try_from(self.close_threshold_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SourceAdapter;
    use crate::clock::FakeClock;
    use crate::dispatcher::LoopbackDispatcher;
    use crate::error::ScrobbleError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// A scripted adapter returning a fixed sequence of fetch results, one
    /// per call, then repeating the last entry forever.
    struct ScriptedAdapter {
        name: String,
        strategy: ReconciliationStrategy,
        script: Mutex<Vec<Vec<PlayRecord>>>,
        calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(name: &str, strategy: ReconciliationStrategy, script: Vec<Vec<PlayRecord>>) -> Self {
            Self {
                name: name.to_string(),
                strategy,
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn source_name(&self) -> &str {
            &self.name
        }

        async fn fetch_recently_played(&self) -> Result<Vec<PlayRecord>, ScrobbleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().await;
            let idx = (self.calls.load(Ordering::SeqCst) - 1).min(script.len().saturating_sub(1));
            Ok(script.get(idx).cloned().unwrap_or_default())
        }

        fn reconciliation(&self) -> ReconciliationStrategy {
            self.strategy
        }
    }

    fn play(track: &str, play_date: DateTime<Utc>) -> PlayRecord {
        PlayRecord::new("scripted", track).with_play_date(play_date)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_play_is_dispatched_and_advances_last_played() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        ));
        let t0 = clock.now();
        let adapter = ScriptedAdapter::new(
            "lastfm",
            ReconciliationStrategy::Timestamped,
            vec![vec![play("A", t0 + ChronoDuration::seconds(60))]],
        );
        let dispatcher = Arc::new(LoopbackDispatcher::new(vec!["client-a".to_string()]));
        let poller = Arc::new(Poller::new(
            Box::new(adapter),
            dispatcher,
            PollerConfig {
                interval_secs: 3600, // long, so the test only observes one cycle
                ..PollerConfig::default()
            },
            vec!["client-a".to_string()],
            clock,
            ));

        let handle = poller.clone().start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop();
        let _ = handle.await;

        let status = poller.status().await;
        assert_eq!(status.tracks_discovered, 1);
        assert_eq!(status.last_track_played_at, Some(t0 + ChronoDuration::seconds(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_to_interval_delays_and_sets_force_refresh() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        ));
        let t0 = clock.now();
        // Play happened 2 seconds ago: within the 5s close threshold.
        let adapter = ScriptedAdapter::new(
            "lastfm",
            ReconciliationStrategy::Timestamped,
            vec![vec![play("A", t0 - ChronoDuration::seconds(2))]],
        );
        let dispatcher = Arc::new(LoopbackDispatcher::new(vec!["client-a".to_string()]));
        let poller = Arc::new(Poller::new(
            Box::new(adapter),
            dispatcher,
            PollerConfig {
                interval_secs: 3600,
                ..PollerConfig::default()
            },
            vec!["client-a".to_string()],
            clock,
        ));

        let handle = poller.clone().start();
        // Before the 10s close-delay elapses, nothing should be discovered yet.
        tokio::time::sleep(Duration::from_millis(5)).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let mid_status = poller.status().await;
        assert_eq!(mid_status.tracks_discovered, 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        poller.stop();
        let _ = handle.await;

        let status = poller.status().await;
        assert_eq!(status.tracks_discovered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_backoff_uses_backed_off_sleep() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        ));
        // Every fetch returns nothing new; last played an hour before start.
        let adapter = ScriptedAdapter::new("lastfm", ReconciliationStrategy::Timestamped, vec![vec![]]);
        let dispatcher = Arc::new(LoopbackDispatcher::new(vec!["client-a".to_string()]));
        let config = PollerConfig {
            interval_secs: 30,
            ..PollerConfig::default()
        };
        let poller = Arc::new(Poller::new(Box::new(adapter), dispatcher, config, vec!["client-a".to_string()], clock.clone()));

        let now = clock.now();
        let quiet_for_an_hour = now - ChronoDuration::hours(1);
        let sleep_time = poller.compute_sleep_time(6, now, quiet_for_an_hour);
        assert_eq!(sleep_time, Duration::from_secs(150));
    }

    #[tokio::test]
    async fn test_backoff_never_applies_below_quiet_threshold() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(
            DateTime::from_timestamp(0, 0).unwrap_or_default(),
        ));
        let adapter = ScriptedAdapter::new("lastfm", ReconciliationStrategy::Timestamped, vec![vec![]]);
        let dispatcher = Arc::new(LoopbackDispatcher::new(vec!["client-a".to_string()]));
        let config = PollerConfig::default();
        let poller = Poller::new(Box::new(adapter), dispatcher, config.clone(), vec!["client-a".to_string()], clock.clone());

        let now = clock.now();
        let quiet_for_an_hour = now - ChronoDuration::hours(1);
        for check_count in 0..=5 {
            let sleep_time = poller.compute_sleep_time(check_count, now, quiet_for_an_hour);
            assert_eq!(sleep_time, config.interval(), "should not back off at or below the quiet threshold");
        }
    }

    #[tokio::test]
    async fn test_stop_before_start_produces_idle_status() {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(DateTime::from_timestamp(0, 0).unwrap_or_default()));
        let adapter = ScriptedAdapter::new("lastfm", ReconciliationStrategy::Timestamped, vec![vec![]]);
        let dispatcher = Arc::new(LoopbackDispatcher::new(vec!["client-a".to_string()]));
        let poller = Poller::new(Box::new(adapter), dispatcher, PollerConfig::default(), vec!["client-a".to_string()], clock);
        let status = poller.status().await;
        assert_eq!(status.phase, PollerPhase::Idle);
        assert!(!status.polling);
    }
}
