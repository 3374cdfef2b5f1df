// =============================================================================
// Commodity Channel Index (CCI)
// =============================================================================
//
//   TP  = (high + low + close) / 3
//   CCI = (TP - SMA(TP, period)) / (0.015 * meanAbsoluteDeviation)
//
// A window whose typical prices never deviate from their mean reads 0 rather
// than dividing by zero. Output rounds to 2 decimals.
// =============================================================================

use crate::types::Bar;

use super::{round_to, IndicatorPoint};

/// Compute the CCI series for `bars` with the given look-back `period`.
pub fn cci_series(bars: &[Bar], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || bars.len() < period {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut result = Vec::with_capacity(bars.len() - period + 1);

    for i in (period - 1)..bars.len() {
        let typical: Vec<f64> = bars[i + 1 - period..=i]
            .iter()
            .map(|b| (b.high + b.low + b.close) / 3.0)
            .collect();
        let sma = typical.iter().sum::<f64>() / period_f;
        let mean_dev = typical.iter().map(|tp| (tp - sma).abs()).sum::<f64>() / period_f;

        let current = typical[period - 1];
        let cci = if mean_dev == 0.0 {
            0.0
        } else {
            (current - sma) / (0.015 * mean_dev)
        };

        result.push(IndicatorPoint::new(bars[i].time, round_to(cci, 2)));
    }

    result
}

// =============================================================================
// Tests
// =============================================================================
