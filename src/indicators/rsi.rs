// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Price deltas from consecutive closes.
// Step 2 — Seed average gain / average loss with the SMA of the first `period`
//          gains / losses.
// Step 3 — Wilder's smoothing for every later delta:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// A window with no losses pins RSI at 100; a completely flat window yields 0.
// The first point lands on the bar at index `period` and values round to
// 2 decimals.
// =============================================================================

use crate::types::Bar;

use super::{round_to, IndicatorPoint};

/// Compute the RSI series for `bars` with the given look-back `period`.
pub fn rsi_series(bars: &[Bar], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || bars.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = bars.windows(2).map(|w| w[1].close - w[0].close).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let mut result = Vec::with_capacity(bars.len() - period);
    result.push(IndicatorPoint::new(
        bars[period].time,
        rsi_from_averages(avg_gain, avg_loss),
    ));

    for (i, &delta) in deltas.iter().enumerate().skip(period) {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        result.push(IndicatorPoint::new(
            bars[i + 1].time,
            rsi_from_averages(avg_gain, avg_loss),
        ));
    }

    result
}

/// Convert average gain / average loss into a rounded RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain > 0.0 { 100.0 } else { 0.0 };
    }
    let rs = avg_gain / avg_loss;
    round_to(100.0 - 100.0 / (1.0 + rs), 2)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(60 * i as i64, c, c, c, c))
            .collect()
    }

    #[test]
    fn needs_period_plus_one_bars() {
        let bars = bars_from_closes(&(1..=14).map(|x| x as f64).collect::<Vec<_>>());
        assert!(rsi_series(&bars, 14).is_empty());
        assert!(rsi_series(&bars, 0).is_empty());
    }

    #[test]
    fn first_point_lands_on_bar_at_period() {
        let bars = bars_from_closes(&(1..=20).map(|x| x as f64).collect::<Vec<_>>());
        let series = rsi_series(&bars, 14);
        assert_eq!(series.len(), 6);
        assert_eq!(series[0].time, bars[14].time);
        assert_eq!(series.last().unwrap().time, bars[19].time);
    }

    #[test]
    fn all_gains_pin_at_100() {
        let bars = bars_from_closes(&(1..=30).map(|x| x as f64).collect::<Vec<_>>());
        for point in rsi_series(&bars, 14) {
            assert!((point.value - 100.0).abs() < 1e-10, "got {}", point.value);
        }
    }

    #[test]
    fn all_losses_pin_at_0() {
        let bars = bars_from_closes(&(1..=30).rev().map(|x| x as f64).collect::<Vec<_>>());
        for point in rsi_series(&bars, 14) {
            assert!(point.value.abs() < 1e-10, "got {}", point.value);
        }
    }

    #[test]
    fn flat_market_reads_zero() {
        let bars = bars_from_closes(&[100.0; 30]);
        for point in rsi_series(&bars, 14) {
            assert!(point.value.abs() < 1e-10, "got {}", point.value);
        }
    }

    #[test]
    fn values_stay_in_range_and_round_to_two_decimals() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let bars = bars_from_closes(&closes);
        let series = rsi_series(&bars, 14);
        assert_eq!(series.len(), 4);
        for point in &series {
            assert!((0.0..=100.0).contains(&point.value));
            assert!((point.value * 100.0 - (point.value * 100.0).round()).abs() < 1e-9);
        }
    }

    #[test]
    fn hand_computed_short_period() {
        // Closes 10, 11, 10, 12 with period 2.
        // Deltas: +1, -1, +2. Seed: avg_gain 0.5, avg_loss 0.5 => RSI 50.
        // Next: avg_gain (0.5 + 2) / 2 = 1.25, avg_loss 0.25 => RS 5 => 83.33.
        let bars = bars_from_closes(&[10.0, 11.0, 10.0, 12.0]);
        let series = rsi_series(&bars, 2);
        assert_eq!(series.len(), 2);
        assert!((series[0].value - 50.0).abs() < 1e-9);
        assert!((series[1].value - 83.33).abs() < 1e-9);
    }
}
