//! Earnings derived from the processed weight

use serde::{Deserialize, Serialize};

/// Rupiah paid per kilogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default = "default_before_sorting")]
    pub before_sorting_per_kg: u64,

    #[serde(default = "default_after_sorting")]
    pub after_sorting_per_kg: u64,
}

fn default_before_sorting() -> u64 {
    8000
}

fn default_after_sorting() -> u64 {
    13000
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            before_sorting_per_kg: default_before_sorting(),
            after_sorting_per_kg: default_after_sorting(),
        }
    }
}

/// Values recomputed together whenever the processed weight changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Earnings {
    pub after_sorting: u64,
    pub before_sorting: u64,
    pub completed_cycles: u64,
}

impl Pricing {
    /// Earnings for a weight in grams, floored to whole rupiah
    pub fn earnings_for(&self, grams: u64) -> Earnings {
        Earnings {
            after_sorting: grams.saturating_mul(self.after_sorting_per_kg) / 1000,
            before_sorting: grams.saturating_mul(self.before_sorting_per_kg) / 1000,
            completed_cycles: grams / 1000,
        }
    }
}

/// Comparison of sorted and unsorted sales
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfitSummary {
    /// Rupiah actually earned per kilogram processed, 0 without weight
    pub effective_rate_per_kg: u64,
    /// Extra rupiah gained by sorting, never negative
    pub profit_difference: u64,
}

impl ProfitSummary {
    pub fn new(grams: u64, earnings: &Earnings) -> Self {
        let effective_rate_per_kg = if grams == 0 {
            0
        } else {
            let rate = earnings.after_sorting as f64 * 1000.0 / grams as f64;
            rate.round() as u64
        };

        Self {
            effective_rate_per_kg,
            profit_difference: earnings.after_sorting.saturating_sub(earnings.before_sorting),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earnings_for_weight() {
        let earnings = Pricing::default().earnings_for(2500);
        assert_eq!(earnings.after_sorting, 32500);
        assert_eq!(earnings.before_sorting, 20000);
        assert_eq!(earnings.completed_cycles, 2);
    }

    #[test]
    fn test_earnings_floor() {
        let earnings = Pricing::default().earnings_for(20);
        assert_eq!(earnings.after_sorting, 260);
        assert_eq!(earnings.before_sorting, 160);
        assert_eq!(earnings.completed_cycles, 0);

        let odd = Pricing {
            before_sorting_per_kg: 7,
            after_sorting_per_kg: 9,
        };
        assert_eq!(odd.earnings_for(150).after_sorting, 1);
        assert_eq!(odd.earnings_for(150).before_sorting, 1);
    }

    #[test]
    fn test_profit_summary() {
        let earnings = Pricing::default().earnings_for(2500);
        let summary = ProfitSummary::new(2500, &earnings);
        assert_eq!(summary.effective_rate_per_kg, 13000);
        assert_eq!(summary.profit_difference, 12500);

        assert_eq!(ProfitSummary::new(0, &Earnings::default()), ProfitSummary::default());
    }

    #[test]
    fn test_profit_difference_floored() {
        let earnings = Earnings {
            after_sorting: 100,
            before_sorting: 400,
            completed_cycles: 0,
        };
        assert_eq!(ProfitSummary::new(40, &earnings).profit_difference, 0);
    }
}
