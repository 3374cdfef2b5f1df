// =============================================================================
// Weighted Moving Average (WMA)
// =============================================================================
//
// Linear weights ascending by recency: the oldest bar in the window carries
// weight 1, the newest carries `period`. Output rounds to 4 decimals.
// =============================================================================

use crate::types::Bar;

use super::{round_to, IndicatorPoint};

/// Compute the WMA series for `bars` with the given look-back `period`.
pub fn wma_series(bars: &[Bar], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || bars.len() < period {
        return Vec::new();
    }

    let weight_sum = (period * (period + 1) / 2) as f64;
    let mut result = Vec::with_capacity(bars.len() - period + 1);

    for i in (period - 1)..bars.len() {
        let start = i + 1 - period;
        let weighted: f64 = bars[start..=i]
            .iter()
            .enumerate()
            .map(|(j, bar)| bar.close * (j + 1) as f64)
            .sum();
        result.push(IndicatorPoint::new(
            bars[i].time,
            round_to(weighted / weight_sum, 4),
        ));
    }
    result
}

// =============================================================================
// Tests
// =============================================================================
