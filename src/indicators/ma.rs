// =============================================================================
// Simple Moving Average (MA)
// =============================================================================
//
// Arithmetic mean of the close (or the collapsed value in time-series mode)
// over a trailing window. The first output lands on the bar at index
// `period - 1`; each window is summed afresh from the raw bars.
// =============================================================================

use crate::types::Bar;

use super::{round_by_magnitude, IndicatorPoint};

/// Compute the MA series for `bars` with the given look-back `period`.
///
/// Returns an empty series when `period` is zero or there are fewer than
/// `period` bars. Output length is `bars.len() - period + 1`.
pub fn ma_series(bars: &[Bar], period: usize) -> Vec<IndicatorPoint> {
    if period == 0 || bars.len() < period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(bars.len() - period + 1);
    for i in (period - 1)..bars.len() {
        let sum: f64 = bars[i + 1 - period..=i].iter().map(|b| b.close).sum();
        result.push(IndicatorPoint::new(
            bars[i].time,
            round_by_magnitude(sum / period as f64),
        ));
    }
    result
}

/// MA at a single index. Returns the 0 sentinel while the window is not yet
/// filled (`index + 1 < period`) or the index is out of range.
pub fn ma_value_at(bars: &[Bar], index: usize, period: usize) -> f64 {
    if period == 0 || index >= bars.len() || index + 1 < period {
        return 0.0;
    }
    let sum: f64 = bars[index + 1 - period..=index].iter().map(|b| b.close).sum();
    round_by_magnitude(sum / period as f64)
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
    fn empty_input_gives_empty_series() {
        assert!(ma_series(&[], 7).is_empty());
    }

    #[test]
    fn period_zero_gives_empty_series() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        assert!(ma_series(&bars, 0).is_empty());
    }

    #[test]
    fn insufficient_data_gives_empty_series() {
        let bars = bars_from_closes(&[1.0, 2.0]);
        assert!(ma_series(&bars, 7).is_empty());
    }

    #[test]
    fn output_length_is_len_minus_period_plus_one() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let bars = bars_from_closes(&closes);
        for period in [1, 5, 7, 30] {
            let series = ma_series(&bars, period);
            assert_eq!(series.len(), bars.len() - period + 1, "period {period}");
        }
    }

    #[test]
    fn each_value_is_the_trailing_window_mean() {
        let closes: Vec<f64> = (0..25).map(|x| (x * x) as f64 * 0.37 + 3.0).collect();
        let bars = bars_from_closes(&closes);
        let period = 6;
        let series = ma_series(&bars, period);

        for (k, point) in series.iter().enumerate() {
            let i = k + period - 1;
            let mean: f64 =
                closes[i + 1 - period..=i].iter().sum::<f64>() / period as f64;
            assert!(
                (point.value - round_by_magnitude(mean)).abs() < 1e-9,
                "index {i}: got {}, want {mean}",
                point.value
            );
            assert_eq!(point.time, bars[i].time);
        }
    }

    #[test]
    fn ramp_100_to_129_period_7_ends_at_126() {
        let closes: Vec<f64> = (100..130).map(|x| x as f64).collect();
        let bars = bars_from_closes(&closes);
        let series = ma_series(&bars, 7);
        assert_eq!(series.len(), 24);
        assert!((series.last().unwrap().value - 126.0).abs() < 1e-9);
    }

    #[test]
    fn value_at_agrees_with_series() {
        let closes: Vec<f64> = (0..40).map(|x| 50.0 + (x as f64).sin() * 5.0).collect();
        let bars = bars_from_closes(&closes);
        let series = ma_series(&bars, 7);

        for (k, point) in series.iter().enumerate() {
            let i = k + 6;
            assert_eq!(ma_value_at(&bars, i, 7), point.value);
        }
    }

    #[test]
    fn value_at_sentinel_below_window() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ma_value_at(&bars, 2, 7), 0.0);
        assert_eq!(ma_value_at(&bars, 99, 3), 0.0);
    }

    #[test]
    fn sub_unit_prices_round_to_eight_decimals() {
        let bars = bars_from_closes(&[0.123456789, 0.123456789, 0.123456789]);
        let series = ma_series(&bars, 3);
        assert_eq!(series[0].value, 0.12345679);
    }
}
