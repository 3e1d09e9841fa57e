//! # Pilah
//!
//! Weight aggregator for a waste-sorting dashboard. A load cell writes its
//! readings into a realtime database; this crate turns them into a steadily
//! increasing processed weight, the earnings it represents and short chart
//! series for display.
//!
//! ## Modules
//!
//! - [`feed`]: remote feed contract with the Firebase and stub implementations
//! - [`aggregator`]: reconciliation, pacing, recovery and notification
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pilah::{Aggregator, Config, FirebaseFeed};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let feed = Arc::new(FirebaseFeed::new(config.firebase.clone())?);
//!     let aggregator = Aggregator::new(feed, config.aggregator_config());
//!
//!     let observer = aggregator.clone();
//!     let _handle = aggregator.subscribe(move || {
//!         println!("{} g processed", observer.processed_weight_grams());
//!     });
//!
//!     if !aggregator.connect().await {
//!         eprintln!("feed unavailable");
//!     }
//!     aggregator.cleanup();
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod feed;

pub use aggregator::{Aggregator, AggregatorConfig, DashboardSnapshot, DebugInfo, ListenerHandle};
pub use config::{Config, ConfigError};
pub use feed::{FeedError, FeedResult, FirebaseFeed, RemoteFeed, StubFeed};
