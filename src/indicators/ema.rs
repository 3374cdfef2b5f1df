// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA weights recent prices more heavily than the simple mean:
//
//   multiplier = 2 / (period + 1)
//   EMA_t      = price_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// Two seeding conventions live here on purpose:
//   - the standalone series (and its single-point lookup) seeds from the
//     close at index `period - 1`, so on a monotone ramp the EMA sits on the
//     recency side of the MA;
//   - `sma_seeded_ema` seeds from the simple mean of the first `period`
//     values and is the building block for MACD's signal line and TRIX's
//     triple smoothing.
// =============================================================================

use crate::types::Bar;

use super::{round_by_magnitude, IndicatorPoint};

/// Compute the EMA series for `bars` with the given look-back `period`.
///
/// The recurrence starts from the close at index `period - 1`; output points
/// run from that bar to the end. Empty when `period` is zero or data is
/// shorter than `period`.
pub fn ema_series(bars: &[Bar], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || bars.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = bars[period - 1].close;

    let mut result = Vec::with_capacity(bars.len() - period + 1);
    result.push(IndicatorPoint::new(
        bars[period - 1].time,
        round_by_magnitude(ema),
    ));

    for bar in &bars[period..] {
        ema = bar.close * multiplier + ema * (1.0 - multiplier);
        result.push(IndicatorPoint::new(bar.time, round_by_magnitude(ema)));
    }
    result
}

/// EMA at a single index, replaying the recurrence from the seed bar.
/// Returns the 0 sentinel while `index + 1 < period` or out of range.
pub fn ema_value_at(bars: &[Bar], index: usize, period: usize) -> f64 {
    if period == 0 || index >= bars.len() || index + 1 < period {
        return 0.0;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = bars[period - 1].close;
    for bar in &bars[period..=index] {
        ema = bar.close * multiplier + ema * (1.0 - multiplier);
    }
    round_by_magnitude(ema)
}

/// SMA-seeded EMA over raw values. Element 0 is the simple mean of the first
/// `period` inputs; output length is `values.len() - period + 1`. Values are
/// left unrounded for downstream composition.
pub(crate) fn sma_seeded_ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;

    let mut result = Vec::with_capacity(values.len() - period + 1);
    result.push(ema);
    for &v in &values[period..] {
        ema = (v - ema) * multiplier + ema;
        result.push(ema);
    }
    result
}

// =============================================================================
// Tests
// =============================================================================
