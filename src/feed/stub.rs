//! Disconnected feed
//!
//! Used when no network backend is reachable. Every subscription is answered
//! immediately with an empty value and `connect` never succeeds.

use async_trait::async_trait;

use super::error::{FeedError, FeedResult};
use super::listeners::{Callback, Subscription};
use super::types::{AppStateSnapshot, RawFeedSample};
use super::RemoteFeed;

/// Feed that is never connected
#[derive(Debug, Clone, Copy, Default)]
pub struct StubFeed;

impl StubFeed {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteFeed for StubFeed {
    fn subscribe_connection(&self, callback: Callback<bool>) -> Subscription {
        callback(false);
        Subscription::noop()
    }

    fn subscribe_history_sum(&self, callback: Callback<f64>) -> Subscription {
        callback(0.0);
        Subscription::noop()
    }

    fn subscribe_history_array(&self, callback: Callback<Vec<RawFeedSample>>) -> Subscription {
        callback(Vec::new());
        Subscription::noop()
    }

    fn subscribe_realtime(&self, callback: Callback<f64>) -> Subscription {
        callback(0.0);
        Subscription::noop()
    }

    fn subscribe_app_state(&self, callback: Callback<AppStateSnapshot>) -> Subscription {
        callback(AppStateSnapshot::default());
        Subscription::noop()
    }

    async fn connect(&self) -> FeedResult<()> {
        Err(FeedError::Unavailable)
    }

    async fn save_app_state(&self, state: &AppStateSnapshot) -> FeedResult<()> {
        tracing::debug!(?state, "Stub feed: save app state (no-op)");
        Ok(())
    }

    async fn reset_app_state(&self) -> FeedResult<()> {
        tracing::debug!("Stub feed: reset app state (no-op)");
        Ok(())
    }

    fn disconnect(&self) {}
}
