//! Firebase Realtime Database feed
//!
//! Streams the three locations over the REST streaming API and persists the
//! application state with plain `PUT` requests.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::{FeedError, FeedResult};
use super::listeners::{Callback, FeedListeners, Subscription};
use super::stream::{apply_patch, apply_put, EventParser, StreamEvent};
use super::types::{history_total, parse_history, AppStateSnapshot, RawFeedSample};
use super::RemoteFeed;
use crate::config::FirebaseConfig;

/// Streamed database location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    History,
    Realtime,
    AppState,
}

impl Location {
    const ALL: [Location; 3] = [Location::History, Location::Realtime, Location::AppState];

    fn path(self, config: &FirebaseConfig) -> &str {
        match self {
            Location::History => &config.history_path,
            Location::Realtime => &config.realtime_path,
            Location::AppState => &config.app_state_path,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Parse the current value of the location and deliver it
    fn dispatch(self, tree: &Value, listeners: &FeedListeners) {
        match self {
            Location::History => {
                let samples = parse_history(tree);
                let total = history_total(&samples);
                tracing::debug!(records = samples.len(), total_grams = total, "History snapshot");
                listeners.history_array.emit(samples);
                listeners.history_sum.emit(total);
            }
            Location::Realtime => match tree {
                Value::Null => listeners.realtime.emit(0.0),
                other => match other.as_f64() {
                    Some(grams) => {
                        tracing::debug!(grams, "Realtime reading");
                        listeners.realtime.emit(grams);
                    }
                    None => tracing::debug!(value = %other, "Ignoring non-numeric realtime reading"),
                },
            },
            Location::AppState => {
                let state = if tree.is_null() {
                    tracing::debug!("App state missing, starting from zero");
                    AppStateSnapshot::default()
                } else {
                    AppStateSnapshot::from_value(tree)
                };
                listeners.app_state.emit(state);
            }
        }
    }
}

/// Connection state shared with the stream tasks
#[derive(Default)]
struct Link {
    connected: AtomicBool,
    /// Set once `connect` completed its handshake
    established: AtomicBool,
    live: [AtomicBool; 3],
    listeners: FeedListeners,
}

impl Link {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.listeners.connection.emit(connected);
    }

    /// Record whether a stream is delivering; returns the previous value
    fn mark_live(&self, location: Location, live: bool) -> bool {
        self.live[location.index()].swap(live, Ordering::SeqCst)
    }

    fn all_live(&self) -> bool {
        self.live.iter().all(|live| live.load(Ordering::SeqCst))
    }

    /// Re-derive the connection status after a stream went up or down
    fn refresh(&self) {
        let up = self.established.load(Ordering::SeqCst) && self.all_live();
        if self.connected.swap(up, Ordering::SeqCst) != up {
            if up {
                tracing::info!("Realtime database connection restored");
            }
            self.listeners.connection.emit(up);
        }
    }

    fn clear(&self) {
        self.established.store(false, Ordering::SeqCst);
        for live in &self.live {
            live.store(false, Ordering::SeqCst);
        }
    }
}

/// Feed backed by a Firebase Realtime Database
///
/// Each location is followed by its own task. A task whose stream drops or
/// goes silent reopens it with exponential backoff; the connection status is
/// `true` only while all three streams deliver.
pub struct FirebaseFeed {
    client: Client,
    config: FirebaseConfig,
    link: Arc<Link>,
    streams: Mutex<Vec<JoinHandle<()>>>,
}

impl FirebaseFeed {
    /// Create a new feed. No request is made until [`RemoteFeed::connect`].
    pub fn new(config: FirebaseConfig) -> FeedResult<Self> {
        // No overall timeout: it would cut the long-lived event streams.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            link: Arc::new(Link::default()),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    /// REST URL of a location, e.g. `{database_url}/realtimeBerat/berat.json`
    fn location_url(&self, location: Location) -> String {
        let path = location
            .path(&self.config)
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        format!("{}/{}.json", self.config.database_url.trim_end_matches('/'), path)
    }

    fn lock_streams(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_streams(&self) {
        for handle in self.lock_streams().drain(..) {
            handle.abort();
        }
        self.link.clear();
    }

    fn spawn_stream(&self, location: Location, ready: mpsc::Sender<FeedResult<()>>) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = self.location_url(location);
        let link = Arc::clone(&self.link);
        let idle_timeout = self.config.idle_timeout();
        let min_delay = self.config.reconnect_delay();
        let max_delay = self.config.reconnect_max_delay();

        tokio::spawn(async move {
            let mut ready = Some(ready);
            let mut delay = min_delay;

            loop {
                let reason = match follow_stream(&client, &url, location, &link, &mut ready, idle_timeout).await {
                    Ok(()) => FeedError::StreamClosed("server closed the stream".to_string()),
                    Err(e) => e,
                };
                let was_live = link.mark_live(location, false);

                // Failures before the first snapshot belong to `connect`.
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(reason)).await;
                    return;
                }

                if was_live {
                    delay = min_delay;
                }
                tracing::warn!(
                    location = ?location,
                    error = %reason,
                    retry_in = ?delay,
                    "Event stream dropped, reopening"
                );
                link.refresh();

                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        })
    }

    async fn put_app_state(&self, state: &AppStateSnapshot) -> FeedResult<()> {
        if !self.is_connected() {
            return Err(FeedError::NotConnected);
        }

        let response = self
            .client
            .put(self.location_url(Location::AppState))
            .timeout(self.config.request_timeout())
            .json(state)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(FeedError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}

/// Follow one location's event stream until it ends.
///
/// Every applied event re-emits the whole location. The first one marks the
/// stream live and signals `ready`. Returns `Ok` when the server closes the
/// stream cleanly.
async fn follow_stream(
    client: &Client,
    url: &str,
    location: Location,
    link: &Link,
    ready: &mut Option<mpsc::Sender<FeedResult<()>>>,
    idle_timeout: Duration,
) -> FeedResult<()> {
    let request = client.get(url).header(ACCEPT, "text/event-stream").send();
    let response = match tokio::time::timeout(idle_timeout, request).await {
        Ok(response) => response?,
        Err(_) => return Err(FeedError::Idle(idle_timeout)),
    };

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(FeedError::Api {
            status: status.as_u16(),
            message: text,
        });
    }

    tracing::debug!(location = ?location, url, "Event stream opened");

    let mut parser = EventParser::new();
    let mut tree = Value::Null;
    let mut body = response.bytes_stream();

    loop {
        let chunk = match tokio::time::timeout(idle_timeout, body.next()).await {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => return Ok(()),
            Err(_) => return Err(FeedError::Idle(idle_timeout)),
        };

        for event in parser.push(&chunk) {
            match StreamEvent::parse(&event)? {
                StreamEvent::Put { path, data } => apply_put(&mut tree, &path, data),
                StreamEvent::Patch { path, data } => apply_patch(&mut tree, &path, data)?,
                StreamEvent::KeepAlive => continue,
                StreamEvent::Cancel(reason) => {
                    return Err(FeedError::StreamClosed(format!("cancelled: {}", reason)))
                }
                StreamEvent::AuthRevoked => {
                    return Err(FeedError::StreamClosed("auth revoked".to_string()))
                }
                StreamEvent::Unknown(name) => {
                    tracing::debug!(event = %name, "Ignoring unknown stream event");
                    continue;
                }
            }

            location.dispatch(&tree, &link.listeners);

            if !link.mark_live(location, true) {
                link.refresh();
            }
            if let Some(tx) = ready.take() {
                let _ = tx.send(Ok(())).await;
            }
        }
    }
}

#[async_trait]
impl RemoteFeed for FirebaseFeed {
    fn subscribe_connection(&self, callback: Callback<bool>) -> Subscription {
        let sub = self.link.listeners.connection.add(Arc::clone(&callback));
        callback(self.is_connected());
        sub
    }

    fn subscribe_history_sum(&self, callback: Callback<f64>) -> Subscription {
        self.link.listeners.history_sum.add(callback)
    }

    fn subscribe_history_array(&self, callback: Callback<Vec<RawFeedSample>>) -> Subscription {
        self.link.listeners.history_array.add(callback)
    }

    fn subscribe_realtime(&self, callback: Callback<f64>) -> Subscription {
        self.link.listeners.realtime.add(callback)
    }

    fn subscribe_app_state(&self, callback: Callback<AppStateSnapshot>) -> Subscription {
        self.link.listeners.app_state.add(callback)
    }

    async fn connect(&self) -> FeedResult<()> {
        if self.is_connected() && !self.lock_streams().is_empty() {
            return Ok(());
        }

        self.abort_streams();

        let (ready_tx, mut ready_rx) = mpsc::channel(Location::ALL.len());
        let handles: Vec<JoinHandle<()>> = Location::ALL
            .iter()
            .map(|location| self.spawn_stream(*location, ready_tx.clone()))
            .collect();
        drop(ready_tx);
        *self.lock_streams() = handles;

        let handshake = async {
            let mut ready = 0;
            while ready < Location::ALL.len() {
                match ready_rx.recv().await {
                    Some(Ok(())) => ready += 1,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(FeedError::StreamClosed(
                            "stream ended before its first snapshot".to_string(),
                        ))
                    }
                }
            }
            Ok(())
        };

        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(timeout)),
        };

        // A stream may have delivered and then dropped before the others were ready.
        let result = result.and_then(|()| {
            if self.link.all_live() {
                Ok(())
            } else {
                Err(FeedError::StreamClosed(
                    "stream dropped before the connection was established".to_string(),
                ))
            }
        });

        match result {
            Ok(()) => {
                tracing::info!(url = %self.config.database_url, "Connected to realtime database");
                self.link.established.store(true, Ordering::SeqCst);
                self.link.set_connected(true);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Realtime database connection failed");
                self.abort_streams();
                self.link.set_connected(false);
                Err(e)
            }
        }
    }

    async fn save_app_state(&self, state: &AppStateSnapshot) -> FeedResult<()> {
        self.put_app_state(state).await?;
        tracing::debug!(?state, "App state saved");
        Ok(())
    }

    async fn reset_app_state(&self) -> FeedResult<()> {
        self.put_app_state(&AppStateSnapshot::default()).await?;
        tracing::info!("App state reset");
        Ok(())
    }

    fn disconnect(&self) {
        self.abort_streams();
        self.link.set_connected(false);
    }
}

impl Drop for FirebaseFeed {
    fn drop(&mut self) {
        self.abort_streams();
    }
}
