//! Feed payload types
//!
//! Typed forms of the records delivered by the remote database. Parsing is
//! lenient: anything that is not a number is treated as absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record from the weight history collection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFeedSample {
    /// Weight in grams
    pub berat: f64,
    /// Timestamp as written by the load cell
    pub waktu: i64,
}

impl RawFeedSample {
    /// Parse a single history child. Returns `None` when `berat` is not numeric.
    pub fn from_value(value: &Value) -> Option<Self> {
        let berat = value.get("berat").and_then(Value::as_f64)?;
        let waktu = value
            .get("waktu")
            .and_then(|w| w.as_i64().or_else(|| w.as_f64().map(|f| f as i64)))
            .unwrap_or(0);

        Some(Self { berat, waktu })
    }
}

/// Parse a history snapshot into samples sorted by `waktu`.
///
/// The collection may arrive as an object keyed by push IDs or as an array
/// (integer keys); both are accepted.
pub fn parse_history(value: &Value) -> Vec<RawFeedSample> {
    let mut samples: Vec<RawFeedSample> = match value {
        Value::Object(children) => children.values().filter_map(RawFeedSample::from_value).collect(),
        Value::Array(children) => children.iter().filter_map(RawFeedSample::from_value).collect(),
        _ => Vec::new(),
    };

    samples.sort_by_key(|s| s.waktu);
    samples
}

/// Sum of all sample weights in grams
pub fn history_total(samples: &[RawFeedSample]) -> f64 {
    samples.iter().map(|s| s.berat).sum()
}

/// Persisted application state record
///
/// Stored at a single location and fully overwritten on every save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSnapshot {
    pub current_weight_grams: u64,
    pub total_earnings: u64,
    pub total_earnings_before_sorting: u64,
}

impl AppStateSnapshot {
    /// Parse a remote record, defaulting missing or malformed fields to zero
    pub fn from_value(value: &Value) -> Self {
        Self {
            current_weight_grams: lenient_u64(value.get("currentWeightGrams")),
            total_earnings: lenient_u64(value.get("totalEarnings")),
            total_earnings_before_sorting: lenient_u64(value.get("totalEarningsBeforeSorting")),
        }
    }
}

fn lenient_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(v) => v
            .as_u64()
            .or_else(|| {
                v.as_f64()
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .map(|f| f.floor() as u64)
            })
            .unwrap_or(0),
        None => 0,
    }
}
