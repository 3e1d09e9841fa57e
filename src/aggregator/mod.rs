//! Weight Aggregator
//!
//! Owns the dashboard state derived from the remote feed:
//!
//! - **Reconciliation**: the raw history total is quantized to a target and the
//!   processed weight walks towards it one step per pacing interval, or snaps
//!   down at once when the target drops
//! - **Recovery**: a persisted snapshot from a previous session is adopted when
//!   it is ahead of the local count
//! - **Notification**: local listeners are told about changes, throttled
//! - **Persistence**: every change of the processed weight is written back
//!
//! ## Example
//!
//! ```rust,no_run
//! use pilah::aggregator::{Aggregator, AggregatorConfig};
//! use pilah::feed::StubFeed;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let aggregator = Aggregator::new(Arc::new(StubFeed::new()), AggregatorConfig::default());
//!     let _handle = aggregator.subscribe(|| println!("changed"));
//!     aggregator.connect().await;
//!     println!("{} g", aggregator.processed_weight_grams());
//!     aggregator.cleanup();
//! }
//! ```

mod earnings;
mod notify;
mod pacing;
mod persist;
mod state;

pub use earnings::{Earnings, Pricing, ProfitSummary};
pub use notify::{Listener, ListenerHandle, Notifier};
pub use pacing::PacingTimer;
pub use persist::{PersistCommand, Persister};
pub use state::{target_grams, AggregatorState, RollingBuffer};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::feed::{AppStateSnapshot, Callback, RawFeedSample, RemoteFeed, Subscription};

/// Number of points in every chart series
pub const SERIES_LEN: usize = 5;

/// Aggregator settings
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Grams added per pacing step; targets are multiples of this
    pub step_grams: u64,
    pub pacing_interval: Duration,
    pub notify_throttle: Duration,
    pub chart_capacity: usize,
    pub history_capacity: usize,
    pub pricing: Pricing,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            step_grams: 20,
            pacing_interval: Duration::from_millis(2000),
            notify_throttle: Duration::from_millis(100),
            chart_capacity: 20,
            history_capacity: 10,
            pricing: Pricing::default(),
        }
    }
}

/// Internal values, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DebugInfo {
    pub raw_total_weight_grams: f64,
    pub processed_weight_grams: u64,
    pub realtime_weight_grams: f64,
    pub next_target_grams: u64,
    pub pacing_active: bool,
}

/// Everything a dashboard renders, read under one lock
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub connected: bool,
    pub processed_weight_grams: u64,
    pub processed_weight_kg: f64,
    pub realtime_weight_grams: f64,
    pub earnings: Earnings,
    pub pricing: Pricing,
    pub profit: ProfitSummary,
    pub chart_series: [u64; SERIES_LEN],
    pub historical_series: [f64; SERIES_LEN],
    pub realtime_series: [f64; SERIES_LEN],
    pub last_update: Option<DateTime<Utc>>,
}

/// Work to do once the state lock is released
#[derive(Debug, Default)]
struct Effects {
    save: Option<AppStateSnapshot>,
    notify: bool,
}

struct Inner {
    feed: Arc<dyn RemoteFeed>,
    config: AggregatorConfig,
    state: Mutex<AggregatorState>,
    notifier: Arc<Notifier>,
    persister: Persister,
    upstream: Mutex<Vec<Subscription>>,
}

/// Handle to the aggregator. Clones share the same state.
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Aggregator {
    /// Create an aggregator over `feed`.
    ///
    /// Must be called from within a tokio runtime: the persistence worker is
    /// spawned here.
    pub fn new(feed: Arc<dyn RemoteFeed>, config: AggregatorConfig) -> Self {
        let state = AggregatorState::new(config.chart_capacity, config.history_capacity);
        let notifier = Notifier::new(config.notify_throttle);
        let persister = Persister::spawn(Arc::clone(&feed));

        Self {
            inner: Arc::new(Inner {
                feed,
                config,
                state: Mutex::new(state),
                notifier,
                persister,
                upstream: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to the feed and open it.
    ///
    /// Returns `false` when the feed could not connect; the current values are
    /// kept and `connect` may be called again.
    pub async fn connect(&self) -> bool {
        let inner = &self.inner;
        inner.teardown_upstream();
        inner.feed.disconnect();

        let feed = &inner.feed;
        let subscriptions = vec![
            feed.subscribe_connection(callback(inner, Inner::on_connection)),
            feed.subscribe_history_sum(callback(inner, Inner::on_history_sum)),
            feed.subscribe_history_array(callback(inner, Inner::on_history_array)),
            feed.subscribe_realtime(callback(inner, Inner::on_realtime)),
            feed.subscribe_app_state(callback(inner, Inner::on_app_state)),
        ];
        inner.lock_upstream().extend(subscriptions);

        match feed.connect().await {
            Ok(()) => {
                tracing::info!(
                    processed_grams = self.processed_weight_grams(),
                    "Aggregator connected"
                );
                inner.reconcile();
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to remote feed");
                inner.lock_state().connected = false;
                inner.notifier.notify();
                false
            }
        }
    }

    /// Register a change listener
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        self.inner.notifier.add(Arc::new(listener))
    }

    /// Zero all values and the persisted record. The connection is kept.
    pub fn reset(&self) {
        self.inner.lock_state().clear_values();
        self.inner.persister.reset();
        tracing::info!("Aggregator reset");
        self.inner.notifier.notify();
    }

    /// Wait until every queued write-back has been attempted
    pub async fn flush(&self) {
        self.inner.persister.flush().await;
    }

    /// Detach from the feed and drop every listener. Safe to call repeatedly.
    pub fn cleanup(&self) {
        let inner = &self.inner;
        inner.teardown_upstream();

        {
            let mut state = inner.lock_state();
            state.pacing.cancel();
            state.chart.clear();
            state.historical.clear();
            state.connected = false;
        }

        inner.feed.disconnect();
        inner.notifier.clear();
        tracing::info!("Aggregator cleaned up");
    }

    pub fn processed_weight_grams(&self) -> u64 {
        self.inner.lock_state().processed_weight_grams
    }

    pub fn processed_weight_kg(&self) -> f64 {
        self.processed_weight_grams() as f64 / 1000.0
    }

    pub fn realtime_weight_grams(&self) -> f64 {
        self.inner.lock_state().realtime_weight_grams
    }

    pub fn earnings(&self) -> Earnings {
        self.inner.lock_state().earnings
    }

    pub fn earnings_after_sorting(&self) -> u64 {
        self.earnings().after_sorting
    }

    pub fn earnings_before_sorting(&self) -> u64 {
        self.earnings().before_sorting
    }

    pub fn completed_cycles(&self) -> u64 {
        self.earnings().completed_cycles
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connected
    }

    pub fn price_before_sorting_per_kg(&self) -> u64 {
        self.inner.config.pricing.before_sorting_per_kg
    }

    pub fn price_after_sorting_per_kg(&self) -> u64 {
        self.inner.config.pricing.after_sorting_per_kg
    }

    pub fn profit_summary(&self) -> ProfitSummary {
        let state = self.inner.lock_state();
        ProfitSummary::new(state.processed_weight_grams, &state.earnings)
    }

    /// Recent processed weights, oldest first
    pub fn chart_series(&self) -> [u64; SERIES_LEN] {
        let state = self.inner.lock_state();
        state.chart.padded(state.processed_weight_grams)
    }

    /// Recent history record weights, oldest first
    pub fn historical_series(&self) -> [f64; SERIES_LEN] {
        self.inner.lock_state().historical.padded(0.0)
    }

    pub fn realtime_series(&self) -> [f64; SERIES_LEN] {
        [self.realtime_weight_grams(); SERIES_LEN]
    }

    pub fn debug_info(&self) -> DebugInfo {
        let state = self.inner.lock_state();
        DebugInfo {
            raw_total_weight_grams: state.raw_total_weight_grams,
            processed_weight_grams: state.processed_weight_grams,
            realtime_weight_grams: state.realtime_weight_grams,
            next_target_grams: target_grams(state.raw_total_weight_grams, self.inner.config.step_grams),
            pacing_active: state.pacing.is_active(),
        }
    }

    pub fn dashboard(&self) -> DashboardSnapshot {
        let state = self.inner.lock_state();
        let processed = state.processed_weight_grams;

        DashboardSnapshot {
            connected: state.connected,
            processed_weight_grams: processed,
            processed_weight_kg: processed as f64 / 1000.0,
            realtime_weight_grams: state.realtime_weight_grams,
            earnings: state.earnings,
            pricing: self.inner.config.pricing,
            profit: ProfitSummary::new(processed, &state.earnings),
            chart_series: state.chart.padded(processed),
            historical_series: state.historical.padded(0.0),
            realtime_series: [state.realtime_weight_grams; SERIES_LEN],
            last_update: state.last_update,
        }
    }
}

/// Wrap an upstream handler so it only holds a weak reference
fn callback<T, F>(inner: &Arc<Inner>, handler: F) -> Callback<T>
where
    T: 'static,
    F: Fn(&Arc<Inner>, T) + Send + Sync + 'static,
{
    let weak = Arc::downgrade(inner);
    Arc::new(move |value: T| {
        if let Some(inner) = weak.upgrade() {
            handler(&inner, value);
        }
    })
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_upstream(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.upstream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn teardown_upstream(&self) {
        let subscriptions: Vec<Subscription> = self.lock_upstream().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    fn apply(&self, effects: Effects) {
        if let Some(snapshot) = effects.save {
            self.persister.save(snapshot);
        }
        if effects.notify {
            self.notifier.notify();
        }
    }

    /// Recompute the derived values and queue a save if the feed is up
    fn recompute(&self, state: &mut AggregatorState, effects: &mut Effects) {
        let grams = state.processed_weight_grams;
        state.earnings = self.config.pricing.earnings_for(grams);
        effects.notify = true;

        if state.connected {
            effects.save = Some(AppStateSnapshot {
                current_weight_grams: grams,
                total_earnings: state.earnings.after_sorting,
                total_earnings_before_sorting: state.earnings.before_sorting,
            });
        }
    }

    fn on_connection(self: &Arc<Self>, connected: bool) {
        let changed = {
            let mut state = self.lock_state();
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        };

        if changed {
            tracing::info!(connected, "Feed connection changed");
            if connected {
                // Catch the store up with anything paced while it was unreachable.
                self.reconcile();
            }
            self.notifier.notify();
        }
    }

    fn on_history_sum(self: &Arc<Self>, raw: f64) {
        if !raw.is_finite() {
            tracing::debug!(raw, "Ignoring non-finite history total");
            return;
        }

        {
            let mut state = self.lock_state();
            state.raw_total_weight_grams = raw;
            state.last_update = Some(Utc::now());
        }
        tracing::debug!(raw_grams = raw, "History total received");

        self.reconcile();
        self.notifier.notify();
    }

    fn on_history_array(self: &Arc<Self>, samples: Vec<RawFeedSample>) {
        self.lock_state()
            .historical
            .replace(samples.iter().map(|s| s.berat));
        self.notifier.notify();
    }

    fn on_realtime(self: &Arc<Self>, grams: f64) {
        if !grams.is_finite() {
            tracing::debug!(grams, "Ignoring non-finite realtime reading");
            return;
        }

        self.lock_state().realtime_weight_grams = grams;
        self.notifier.notify();
    }

    /// Adopt a persisted snapshot that is ahead of the local count
    fn on_app_state(self: &Arc<Self>, snapshot: AppStateSnapshot) {
        let adopted = {
            let mut state = self.lock_state();
            let weight = snapshot.current_weight_grams;
            let processed = state.processed_weight_grams;

            if weight > processed || processed == 0 {
                state.processed_weight_grams = weight;
                state.earnings.after_sorting = snapshot.total_earnings;
                state.earnings.before_sorting = snapshot.total_earnings_before_sorting;
                state.earnings.completed_cycles = weight / 1000;
                state.chart.push(weight);
                true
            } else {
                false
            }
        };

        if adopted {
            tracing::info!(
                weight_grams = snapshot.current_weight_grams,
                "Adopted persisted app state"
            );
            self.notifier.notify();
        }
    }

    /// Bring the processed weight in line with the raw total
    fn reconcile(self: &Arc<Self>) {
        let mut effects = Effects::default();

        {
            let mut state = self.lock_state();
            let target = target_grams(state.raw_total_weight_grams, self.config.step_grams);
            let processed = state.processed_weight_grams;

            match target.cmp(&processed) {
                Ordering::Less => {
                    state.pacing.cancel();
                    state.processed_weight_grams = target;
                    self.recompute(&mut state, &mut effects);
                    tracing::info!(from_grams = processed, to_grams = target, "Processed weight snapped down");
                }
                Ordering::Greater => {
                    if !state.pacing.is_active() {
                        self.start_pacing(&mut state);
                    }
                }
                Ordering::Equal => {
                    state.pacing.cancel();
                    self.recompute(&mut state, &mut effects);
                }
            }
        }

        self.apply(effects);
    }

    fn start_pacing(self: &Arc<Self>, state: &mut AggregatorState) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "Cannot start pacing outside a tokio runtime");
                return;
            }
        };

        let generation = state.pacing.begin();
        let handle = runtime.spawn(run_pacing(
            Arc::downgrade(self),
            generation,
            self.config.pacing_interval,
        ));
        state.pacing.install(generation, handle);
        tracing::debug!(
            processed_grams = state.processed_weight_grams,
            "Pacing started"
        );
    }

    /// One pacing tick. Returns `false` once the cycle is over.
    fn pacing_step(&self, generation: u64) -> bool {
        let mut effects = Effects::default();

        {
            let mut state = self.lock_state();
            if !state.pacing.is_current(generation) {
                return false;
            }

            let target = target_grams(state.raw_total_weight_grams, self.config.step_grams);
            if state.processed_weight_grams >= target {
                state.pacing.finish(generation);
                tracing::debug!(processed_grams = state.processed_weight_grams, "Pacing finished");
                return false;
            }

            let next = (state.processed_weight_grams + self.config.step_grams).min(target);
            state.processed_weight_grams = next;
            state.chart.push(next);
            self.recompute(&mut state, &mut effects);
            tracing::debug!(processed_grams = next, target_grams = target, "Pacing step");
        }

        self.apply(effects);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.teardown_upstream();
        self.lock_state().pacing.cancel();
    }
}

async fn run_pacing(inner: Weak<Inner>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        if !inner.pacing_step(generation) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::mock::MockFeed;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    async fn connected(feed: &Arc<MockFeed>) -> Aggregator {
        let aggregator = Aggregator::new(feed.clone(), AggregatorConfig::default());
        assert!(aggregator.connect().await);
        aggregator
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_in_steps() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.push_raw_total(100.0);
        assert_eq!(aggregator.processed_weight_grams(), 0);
        assert!(aggregator.debug_info().pacing_active);

        sleep_ms(2_100).await;
        assert_eq!(aggregator.processed_weight_grams(), 20);
        for expected in [40, 60, 80, 100] {
            sleep_ms(2_000).await;
            assert_eq!(aggregator.processed_weight_grams(), expected);
        }

        sleep_ms(2_000).await;
        assert_eq!(aggregator.processed_weight_grams(), 100);
        assert!(!aggregator.debug_info().pacing_active);
        assert_eq!(aggregator.chart_series(), [20, 40, 60, 80, 100]);
        assert_eq!(aggregator.earnings_after_sorting(), 1300);

        aggregator.flush().await;
        assert_eq!(feed.last_saved().map(|s| s.current_weight_grams), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_target_continues_running_cycle() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.push_raw_total(60.0);
        sleep_ms(2_100).await;
        assert_eq!(aggregator.processed_weight_grams(), 20);

        sleep_ms(900).await;
        feed.push_raw_total(100.0);

        // A restarted cycle would not step again until 5 s.
        sleep_ms(1_100).await;
        assert_eq!(aggregator.processed_weight_grams(), 40);

        sleep_ms(6_000).await;
        assert_eq!(aggregator.processed_weight_grams(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snap_down_cancels_pacing() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.push_app_state(140, 1820, 1120);
        assert_eq!(aggregator.processed_weight_grams(), 140);

        feed.push_raw_total(65.0);
        assert_eq!(aggregator.processed_weight_grams(), 60);
        assert_eq!(aggregator.earnings_after_sorting(), 780);
        assert_eq!(aggregator.earnings_before_sorting(), 480);

        feed.push_raw_total(200.0);
        sleep_ms(2_100).await;
        assert_eq!(aggregator.processed_weight_grams(), 80);

        feed.push_raw_total(60.0);
        assert_eq!(aggregator.processed_weight_grams(), 60);
        assert!(!aggregator.debug_info().pacing_active);

        sleep_ms(6_000).await;
        assert_eq!(aggregator.processed_weight_grams(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_total_is_noop() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.push_app_state(40, 520, 320);
        feed.push_raw_total(40.0);
        feed.push_raw_total(40.0);

        assert_eq!(aggregator.processed_weight_grams(), 40);
        assert!(!aggregator.debug_info().pacing_active);

        sleep_ms(5_000).await;
        assert_eq!(aggregator.processed_weight_grams(), 40);
        assert_eq!(aggregator.chart_series(), [40; 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_adoption_guard() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.push_app_state(500, 6500, 4000);
        assert_eq!(aggregator.processed_weight_grams(), 500);

        feed.push_app_state(300, 3900, 2400);
        assert_eq!(aggregator.processed_weight_grams(), 500);
        assert_eq!(aggregator.earnings_after_sorting(), 6500);

        feed.push_app_state(2500, 32500, 20000);
        assert_eq!(aggregator.processed_weight_grams(), 2500);
        assert_eq!(aggregator.earnings_before_sorting(), 20000);
        assert_eq!(aggregator.completed_cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chart_padding() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        assert_eq!(aggregator.chart_series(), [0; 5]);

        feed.push_app_state(20, 260, 160);
        feed.push_app_state(40, 520, 320);
        assert_eq!(aggregator.chart_series(), [20, 20, 20, 20, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_array_feeds_historical_series() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        assert_eq!(aggregator.historical_series(), [0.0; 5]);

        feed.push_history(&[10.0, 25.0]);
        assert_eq!(aggregator.historical_series(), [10.0, 10.0, 10.0, 10.0, 25.0]);
        assert_eq!(aggregator.debug_info().raw_total_weight_grams, 35.0);
        assert_eq!(aggregator.debug_info().next_target_grams, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_are_throttled() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        sleep_ms(200).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = aggregator.clone();
        let s = Arc::clone(&seen);
        let _handle = aggregator.subscribe(move || {
            s.lock().unwrap().push(observer.realtime_weight_grams());
        });

        for i in 1..=10 {
            feed.push_realtime(i as f64 * 10.0);
            sleep_ms(5).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![10.0]);

        sleep_ms(100).await;
        assert_eq!(*seen.lock().unwrap(), vec![10.0, 100.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_everything() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.push_app_state(500, 6500, 4000);
        feed.push_history(&[200.0, 320.0]);
        feed.push_realtime(75.0);
        assert!(aggregator.debug_info().pacing_active);

        aggregator.reset();
        aggregator.flush().await;

        let info = aggregator.debug_info();
        assert_eq!(info.raw_total_weight_grams, 0.0);
        assert_eq!(info.processed_weight_grams, 0);
        assert_eq!(info.realtime_weight_grams, 0.0);
        assert!(!info.pacing_active);
        assert_eq!(aggregator.earnings(), Earnings::default());
        assert_eq!(aggregator.chart_series(), [0; 5]);
        assert_eq!(aggregator.historical_series(), [0.0; 5]);
        assert!(aggregator.is_connected());
        assert_eq!(feed.resets.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_does_not_block_others() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        sleep_ms(200).await;

        let _bad = aggregator.subscribe(|| panic!("render failed"));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _good = aggregator.subscribe(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });

        feed.push_realtime(5.0);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_notifications() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        sleep_ms(200).await;

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = aggregator.subscribe(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });
        handle.unsubscribe();

        feed.push_realtime(5.0);
        sleep_ms(200).await;
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure() {
        let feed = MockFeed::failing();
        let aggregator = Aggregator::new(feed.clone(), AggregatorConfig::default());

        assert!(!aggregator.connect().await);
        assert!(!aggregator.is_connected());
        assert_eq!(aggregator.processed_weight_grams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_keeps_last_values() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        feed.push_app_state(500, 6500, 4000);
        feed.push_realtime(30.0);

        feed.set_fail_connect(true);
        assert!(!aggregator.connect().await);

        assert!(!aggregator.is_connected());
        assert_eq!(aggregator.processed_weight_grams(), 500);
        assert_eq!(aggregator.earnings_after_sorting(), 6500);
        assert_eq!(aggregator.earnings_before_sorting(), 4000);
        assert_eq!(aggregator.realtime_weight_grams(), 30.0);
        assert_eq!(aggregator.chart_series(), [500; 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_does_not_block_pacing() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        feed.set_fail_saves(true);
        sleep_ms(200).await;

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _handle = aggregator.subscribe(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });

        feed.push_raw_total(60.0);
        sleep_ms(2_100).await;
        assert_eq!(aggregator.processed_weight_grams(), 20);
        sleep_ms(2_000).await;
        assert_eq!(aggregator.processed_weight_grams(), 40);
        sleep_ms(2_000).await;
        assert_eq!(aggregator.processed_weight_grams(), 60);
        assert_eq!(aggregator.earnings_after_sorting(), 780);

        aggregator.flush().await;
        let attempted: Vec<u64> = feed.saved().iter().map(|s| s.current_weight_grams).collect();
        assert!(attempted.ends_with(&[20, 40, 60]));
        assert!(count.load(AtomicOrdering::SeqCst) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_link_persists_weight_paced_offline() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.set_link(false);
        assert!(!aggregator.is_connected());

        feed.push_raw_total(40.0);
        sleep_ms(6_100).await;
        assert_eq!(aggregator.processed_weight_grams(), 40);
        assert!(!aggregator.debug_info().pacing_active);

        aggregator.flush().await;
        assert_eq!(feed.last_saved().map(|s| s.current_weight_grams), Some(0));

        feed.set_link(true);
        assert!(aggregator.is_connected());
        aggregator.flush().await;
        assert_eq!(feed.last_saved().map(|s| s.current_weight_grams), Some(40));
        assert_eq!(feed.last_saved().map(|s| s.total_earnings), Some(520));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_does_not_duplicate_upstream() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        assert!(aggregator.connect().await);

        assert_eq!(feed.listeners.history_sum.len(), 1);
        assert_eq!(feed.listeners.app_state.len(), 1);
        assert_eq!(feed.listeners.connection.len(), 1);
        assert!(aggregator.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_is_idempotent() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        feed.push_raw_total(100.0);

        aggregator.cleanup();
        aggregator.cleanup();

        assert!(!aggregator.is_connected());
        assert!(!aggregator.debug_info().pacing_active);
        assert!(feed.listeners.realtime.is_empty());

        feed.push_realtime(30.0);
        assert_eq!(aggregator.realtime_weight_grams(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_finite_values_ignored() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;

        feed.push_realtime(40.0);
        feed.push_realtime(f64::NAN);
        assert_eq!(aggregator.realtime_weight_grams(), 40.0);
        assert_eq!(aggregator.realtime_series(), [40.0; 5]);

        feed.push_raw_total(f64::INFINITY);
        assert_eq!(aggregator.debug_info().raw_total_weight_grams, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashboard_snapshot() {
        let feed = MockFeed::new();
        let aggregator = connected(&feed).await;
        feed.push_app_state(2500, 32500, 20000);

        let dashboard = aggregator.dashboard();
        assert!(dashboard.connected);
        assert_eq!(dashboard.processed_weight_kg, 2.5);
        assert_eq!(dashboard.profit.profit_difference, 12500);
        assert_eq!(dashboard.profit.effective_rate_per_kg, 13000);
        assert_eq!(aggregator.price_after_sorting_per_kg(), 13000);

        let json = serde_json::to_value(&dashboard).unwrap();
        assert_eq!(json["earnings"]["after_sorting"], 32500);
    }
}
