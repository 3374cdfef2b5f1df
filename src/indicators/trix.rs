// =============================================================================
// TRIX — Triple-Smoothed EMA Rate of Change
// =============================================================================
//
// Closes pass through three SMA-seeded EMA stages, then each point is the
// one-step rate of change of the third stage scaled to basis points:
//
//   TRIX_i = (ema3_i - ema3_{i-1}) / ema3_{i-1} * 10000
//
// Stage outputs shift by `period - 1` bars each, so ema3 element `j` belongs
// to bar `j + 3 * (period - 1)` and the series' last point lands on the last
// bar. Output rounds to 4 decimals.
// =============================================================================

use crate::types::Bar;

use super::ema::sma_seeded_ema;
use super::{round_to, IndicatorPoint};

/// Compute the TRIX series for `bars`. Empty until `3 * period` bars exist.
pub fn trix_series(bars: &[Bar], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || bars.len() < period * 3 {
        return Vec::new();
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema1 = sma_seeded_ema(&closes, period);
    let ema2 = sma_seeded_ema(&ema1, period);
    let ema3 = sma_seeded_ema(&ema2, period);

    let offset = 3 * (period - 1);
    let mut result = Vec::with_capacity(ema3.len().saturating_sub(1));
    for i in 1..ema3.len() {
        let trix = (ema3[i] - ema3[i - 1]) / ema3[i - 1] * 10000.0;
        result.push(IndicatorPoint::new(bars[offset + i].time, round_to(trix, 4)));
    }
    result
}

// =============================================================================
// Tests
// =============================================================================
