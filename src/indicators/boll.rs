// =============================================================================
// Bollinger Bands (BOLL)
// =============================================================================
//
// Middle band is the simple moving average of closes; upper and lower bands
// sit `multiplier` population standard deviations away. Series points round
// to 2 decimals, the single-point readout keeps 4.
// =============================================================================

use crate::types::Bar;

use super::{round_to, IndicatorPoint};

/// The three band lines, index-aligned with each other.
#[derive(Debug, Clone, Default)]
pub struct BollSeries {
    pub upper: Vec<IndicatorPoint>,
    pub middle: Vec<IndicatorPoint>,
    pub lower: Vec<IndicatorPoint>,
}

/// Band readout at one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollValue {
    const ZERO: BollValue = BollValue {
        upper: 0.0,
        middle: 0.0,
        lower: 0.0,
    };
}

/// Compute all three bands for `bars`.
pub fn boll_series(bars: &[Bar], period: usize, multiplier: f64) -> BollSeries {
    if period == 0 || bars.len() < period {
        return BollSeries::default();
    }

    let mut series = BollSeries::default();
    for i in (period - 1)..bars.len() {
        let (sma, std_dev) = window_stats(&bars[i + 1 - period..=i], period);
        let time = bars[i].time;
        series
            .upper
            .push(IndicatorPoint::new(time, round_to(sma + multiplier * std_dev, 2)));
        series.middle.push(IndicatorPoint::new(time, round_to(sma, 2)));
        series
            .lower
            .push(IndicatorPoint::new(time, round_to(sma - multiplier * std_dev, 2)));
    }
    series
}

/// Band values at `index`, or the zero readout when the window has not filled
/// or `index` is out of range.
pub fn boll_value_at(bars: &[Bar], index: usize, period: usize, multiplier: f64) -> BollValue {
    if period == 0 || index >= bars.len() || index + 1 < period {
        return BollValue::ZERO;
    }

    let (sma, std_dev) = window_stats(&bars[index + 1 - period..=index], period);
    BollValue {
        upper: round_to(sma + multiplier * std_dev, 4),
        middle: round_to(sma, 4),
        lower: round_to(sma - multiplier * std_dev, 4),
    }
}

fn window_stats(window: &[Bar], period: usize) -> (f64, f64) {
    let period_f = period as f64;
    let sma = window.iter().map(|b| b.close).sum::<f64>() / period_f;
    let variance = window
        .iter()
        .map(|b| (b.close - sma).powi(2))
        .sum::<f64>()
        / period_f;
    (sma, variance.sqrt())
}

// =============================================================================
// Tests
// =============================================================================
