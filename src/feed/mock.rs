//! In-memory feed for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::{FeedError, FeedResult};
use super::listeners::{Callback, FeedListeners, Subscription};
use super::types::{history_total, AppStateSnapshot, RawFeedSample};
use super::RemoteFeed;

/// Feed driven by the test, recording everything written back
#[derive(Default)]
pub(crate) struct MockFeed {
    pub listeners: FeedListeners,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    pub fail_saves: AtomicBool,
    pub saves: Mutex<Vec<AppStateSnapshot>>,
    pub resets: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let feed = Self::default();
        feed.fail_connect.store(true, Ordering::SeqCst);
        Arc::new(feed)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make every save and reset fail (they are still recorded)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Simulate the upstream link going down or coming back on its own
    pub fn set_link(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
        self.listeners.connection.emit(up);
    }

    /// Deliver a history snapshot with the given weights (list, then sum)
    pub fn push_history(&self, weights: &[f64]) {
        let samples: Vec<RawFeedSample> = weights
            .iter()
            .enumerate()
            .map(|(i, berat)| RawFeedSample {
                berat: *berat,
                waktu: i as i64,
            })
            .collect();
        let total = history_total(&samples);
        self.listeners.history_array.emit(samples);
        self.listeners.history_sum.emit(total);
    }

    pub fn push_raw_total(&self, grams: f64) {
        self.listeners.history_sum.emit(grams);
    }

    pub fn push_realtime(&self, grams: f64) {
        self.listeners.realtime.emit(grams);
    }

    pub fn push_app_state(&self, weight: u64, after: u64, before: u64) {
        self.listeners.app_state.emit(AppStateSnapshot {
            current_weight_grams: weight,
            total_earnings: after,
            total_earnings_before_sorting: before,
        });
    }

    pub fn saved(&self) -> Vec<AppStateSnapshot> {
        self.saves.lock().unwrap().clone()
    }

    pub fn last_saved(&self) -> Option<AppStateSnapshot> {
        self.saves.lock().unwrap().last().copied()
    }
}

impl MockFeed {
    fn write_result(&self) -> FeedResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            Err(FeedError::Api {
                status: 503,
                message: "unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteFeed for MockFeed {
    fn subscribe_connection(&self, callback: Callback<bool>) -> Subscription {
        let sub = self.listeners.connection.add(Arc::clone(&callback));
        callback(self.connected.load(Ordering::SeqCst));
        sub
    }

    fn subscribe_history_sum(&self, callback: Callback<f64>) -> Subscription {
        self.listeners.history_sum.add(callback)
    }

    fn subscribe_history_array(&self, callback: Callback<Vec<RawFeedSample>>) -> Subscription {
        self.listeners.history_array.add(callback)
    }

    fn subscribe_realtime(&self, callback: Callback<f64>) -> Subscription {
        self.listeners.realtime.add(callback)
    }

    fn subscribe_app_state(&self, callback: Callback<AppStateSnapshot>) -> Subscription {
        self.listeners.app_state.add(callback)
    }

    async fn connect(&self) -> FeedResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            self.listeners.connection.emit(false);
            return Err(FeedError::Timeout(Duration::from_secs(15)));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.listeners.connection.emit(true);
        Ok(())
    }

    async fn save_app_state(&self, state: &AppStateSnapshot) -> FeedResult<()> {
        self.saves.lock().unwrap().push(*state);
        self.write_result()
    }

    async fn reset_app_state(&self) -> FeedResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.write_result()
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.listeners.connection.emit(false);
    }
}
