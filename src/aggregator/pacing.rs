//! Pacing timer bookkeeping
//!
//! At most one pacing task runs at a time. Each task is tagged with the
//! generation it was started under; cancelling bumps the generation so a task
//! that wakes up after cancellation sees it is stale and does nothing.

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct PacingTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl PacingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the running task, if any
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Cancel any previous task and return the generation for a new one
    pub fn begin(&mut self) -> u64 {
        self.cancel();
        self.generation
    }

    /// Record the task started for `generation`
    pub fn install(&mut self, generation: u64, handle: JoinHandle<()>) {
        if self.is_current(generation) {
            self.handle = Some(handle);
        } else {
            handle.abort();
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Called by the task itself when it has nothing left to do
    pub fn finish(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.generation = self.generation.wrapping_add(1);
            self.handle = None;
        }
    }
}
