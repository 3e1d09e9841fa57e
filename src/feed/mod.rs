//! Remote Feed Adapter
//!
//! Connects the aggregator to the realtime database that the load cell
//! writes into.
//!
//! ## Locations
//!
//! - **History**: collection of `{berat, waktu}` records, delivered both as a
//!   sorted list and as the sum of all weights
//! - **Realtime**: the current scale reading
//! - **App state**: the persisted `{currentWeightGrams, totalEarnings,
//!   totalEarningsBeforeSorting}` record
//!
//! ## Implementations
//!
//! - [`FirebaseFeed`]: Firebase Realtime Database over REST streaming
//! - [`StubFeed`]: answers everything with zeros and never connects

mod error;
mod firebase;
mod listeners;
#[cfg(test)]
pub(crate) mod mock;
mod stream;
mod stub;
mod types;

pub use error::{FeedError, FeedResult};
pub use firebase::FirebaseFeed;
pub use listeners::{Callback, FeedListeners, ListenerSet, Subscription};
pub use stream::{apply_patch, apply_put, EventParser, ServerEvent, StreamEvent};
pub use stub::StubFeed;
pub use types::{history_total, parse_history, AppStateSnapshot, RawFeedSample};

use async_trait::async_trait;

/// Source of the raw weight streams and sink for the persisted state
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    /// Connection status changes. The current status is delivered immediately.
    fn subscribe_connection(&self, callback: Callback<bool>) -> Subscription;

    /// Sum of all history weights in grams
    fn subscribe_history_sum(&self, callback: Callback<f64>) -> Subscription;

    /// Full history snapshot, sorted by `waktu`
    fn subscribe_history_array(&self, callback: Callback<Vec<RawFeedSample>>) -> Subscription;

    /// Current scale reading in grams
    fn subscribe_realtime(&self, callback: Callback<f64>) -> Subscription;

    /// Persisted application state
    fn subscribe_app_state(&self, callback: Callback<AppStateSnapshot>) -> Subscription;

    /// Open the upstream streams.
    ///
    /// Resolves once every location has delivered its first value.
    async fn connect(&self) -> FeedResult<()>;

    /// Overwrite the persisted application state
    async fn save_app_state(&self, state: &AppStateSnapshot) -> FeedResult<()>;

    /// Overwrite the persisted application state with zeros
    async fn reset_app_state(&self) -> FeedResult<()>;

    /// Close the upstream streams
    fn disconnect(&self);
}
