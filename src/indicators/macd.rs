// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA(fast) - EMA(slow), both SMA-seeded and subtracted at the
//              same bar index (the two EMA arrays start at different offsets,
//              so each is shifted by its own period before subtracting).
// Signal     = SMA-seeded EMA(signal_period) over the rounded MACD values.
// Histogram  = MACD - signal at the same bar.
//
// All three lines round to 4 decimals. The MACD line starts at bar
// `slow - 1`, signal and histogram at `slow + signal_period - 2`.
// =============================================================================

use crate::types::Bar;

use super::ema::sma_seeded_ema;
use super::{round_to, IndicatorPoint};

/// The three MACD lines. `signal` and `histogram` are index-aligned with
/// each other; both trail `macd` by `signal_period - 1` points.
#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd: Vec<IndicatorPoint>,
    pub signal: Vec<IndicatorPoint>,
    pub histogram: Vec<IndicatorPoint>,
}

/// Compute MACD for `bars`. Empty until `slow + signal_period` bars exist.
pub fn macd_series(bars: &[Bar], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    if fast == 0 || signal_period == 0 || slow < fast || bars.len() < slow + signal_period {
        return MacdSeries::default();
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let fast_ema = sma_seeded_ema(&closes, fast);
    let slow_ema = sma_seeded_ema(&closes, slow);

    // fast_ema[j] belongs to bar j + fast - 1, slow_ema[j] to bar j + slow - 1.
    let mut macd = Vec::with_capacity(bars.len() - slow + 1);
    for i in (slow - 1)..bars.len() {
        let diff = fast_ema[i + 1 - fast] - slow_ema[i + 1 - slow];
        macd.push(IndicatorPoint::new(bars[i].time, round_to(diff, 4)));
    }

    let macd_values: Vec<f64> = macd.iter().map(|p| p.value).collect();
    let signal: Vec<IndicatorPoint> = sma_seeded_ema(&macd_values, signal_period)
        .into_iter()
        .enumerate()
        .map(|(j, v)| IndicatorPoint::new(macd[j + signal_period - 1].time, round_to(v, 4)))
        .collect();

    let mut histogram = Vec::with_capacity(signal.len());
    for i in (signal_period - 1)..macd.len() {
        let hist = macd[i].value - signal[i + 1 - signal_period].value;
        histogram.push(IndicatorPoint::new(macd[i].time, round_to(hist, 4)));
    }

    MacdSeries {
        macd,
        signal,
        histogram,
    }
}

// =============================================================================
// Tests
// =============================================================================
