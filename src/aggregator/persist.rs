//! Background write-back of the processed weight
//!
//! Saves and resets are queued to a single worker so they reach the remote
//! store in the order they were issued. Failures are logged and dropped.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::feed::{AppStateSnapshot, RemoteFeed};

#[derive(Debug)]
pub enum PersistCommand {
    Save(AppStateSnapshot),
    Reset,
    /// Completes once every earlier command has been handled
    Flush(oneshot::Sender<()>),
}

/// Sending half of the persistence worker
#[derive(Debug, Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl Persister {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(feed: Arc<dyn RemoteFeed>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(feed, rx));
        Self { tx }
    }

    pub fn save(&self, state: AppStateSnapshot) {
        self.send(PersistCommand::Save(state));
    }

    pub fn reset(&self) {
        self.send(PersistCommand::Reset);
    }

    /// Wait until everything queued so far has been written
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(PersistCommand::Flush(done));
        let _ = wait.await;
    }

    fn send(&self, command: PersistCommand) {
        if let Err(e) = self.tx.send(command) {
            tracing::warn!(command = ?e.0, "Persistence worker stopped, dropping command");
        }
    }
}

async fn run_worker(feed: Arc<dyn RemoteFeed>, mut rx: mpsc::UnboundedReceiver<PersistCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            PersistCommand::Save(state) => {
                if let Err(e) = feed.save_app_state(&state).await {
                    tracing::warn!(
                        weight_grams = state.current_weight_grams,
                        error = %e,
                        "Failed to save app state"
                    );
                }
            }
            PersistCommand::Reset => {
                if let Err(e) = feed.reset_app_state().await {
                    tracing::warn!(error = %e, "Failed to reset app state");
                }
            }
            PersistCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Persistence worker stopped");
}
