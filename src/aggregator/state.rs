//! Aggregator state

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::earnings::Earnings;
use super::pacing::PacingTimer;

/// Fixed-capacity buffer that evicts its oldest sample first
#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RollingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Replace the contents, keeping only the newest `capacity` samples
    pub fn replace(&mut self, samples: impl IntoIterator<Item = T>) {
        self.samples.clear();
        for sample in samples {
            self.push(sample);
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.samples.iter().copied().collect()
    }

    /// The last `N` samples, oldest first.
    ///
    /// Short buffers are left-padded with their earliest sample; an empty
    /// buffer yields `fallback` in every slot.
    pub fn padded<const N: usize>(&self, fallback: T) -> [T; N] {
        let len = self.samples.len();
        if len == 0 {
            return [fallback; N];
        }

        let skip = len.saturating_sub(N);
        let missing = N.saturating_sub(len);
        let first = self.samples[skip];

        std::array::from_fn(|i| {
            if i < missing {
                first
            } else {
                self.samples[skip + i - missing]
            }
        })
    }
}

/// Processed weight target for a raw total: the largest multiple of `step`
/// not above `raw`
pub fn target_grams(raw: f64, step: u64) -> u64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    let step = step.max(1);
    (raw as u64 / step) * step
}

/// Everything the aggregator owns, guarded by one mutex
#[derive(Debug)]
pub struct AggregatorState {
    pub raw_total_weight_grams: f64,
    pub processed_weight_grams: u64,
    pub realtime_weight_grams: f64,
    pub earnings: Earnings,
    pub chart: RollingBuffer<u64>,
    pub historical: RollingBuffer<f64>,
    pub connected: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub pacing: PacingTimer,
}

impl AggregatorState {
    pub fn new(chart_capacity: usize, history_capacity: usize) -> Self {
        Self {
            raw_total_weight_grams: 0.0,
            processed_weight_grams: 0,
            realtime_weight_grams: 0.0,
            earnings: Earnings::default(),
            chart: RollingBuffer::new(chart_capacity),
            historical: RollingBuffer::new(history_capacity),
            connected: false,
            last_update: None,
            pacing: PacingTimer::new(),
        }
    }

    /// Zero every value except the connection status
    pub fn clear_values(&mut self) {
        self.raw_total_weight_grams = 0.0;
        self.processed_weight_grams = 0;
        self.realtime_weight_grams = 0.0;
        self.earnings = Earnings::default();
        self.chart.clear();
        self.historical.clear();
        self.last_update = None;
        self.pacing.cancel();
    }
}
