// =============================================================================
// Parabolic SAR
// =============================================================================
//
// Trend-following stop. Each step the SAR advances toward the extreme point
// by the acceleration factor, then clamps so it never crosses into the prior
// two bars' range. A new extreme bumps the factor by `step` up to `max_step`;
// price piercing the SAR flips the trend, moves the SAR to the old extreme,
// and resets the factor.
//
// One point per input bar, 4 decimals.
// =============================================================================

use crate::types::Bar;

use super::{round_to, IndicatorPoint};

/// Compute the SAR series for `bars`.
pub fn sar_series(bars: &[Bar], step: f64, max_step: f64) -> Vec<IndicatorPoint> {
    if bars.len() < 2 {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(bars.len());
    let mut uptrend = true;
    let mut sar = bars[0].low;
    let mut ep = bars[0].high;
    let mut af = step;

    result.push(IndicatorPoint::new(bars[0].time, round_to(sar, 4)));

    for i in 1..bars.len() {
        let current = &bars[i];
        let previous = &bars[i - 1];

        sar += af * (ep - sar);

        if uptrend {
            // SAR may not rise above the prior two lows.
            sar = sar.min(previous.low);
            if i >= 2 {
                sar = sar.min(bars[i - 2].low);
            }

            if current.high > ep {
                ep = current.high;
                af = (af + step).min(max_step);
            }

            if current.low <= sar {
                uptrend = false;
                sar = ep;
                ep = current.low;
                af = step;
            }
        } else {
            // SAR may not fall below the prior two highs.
            sar = sar.max(previous.high);
            if i >= 2 {
                sar = sar.max(bars[i - 2].high);
            }

            if current.low < ep {
                ep = current.low;
                af = (af + step).min(max_step);
            }

            if current.high >= sar {
                uptrend = true;
                sar = ep;
                ep = current.high;
                af = step;
            }
        }

        result.push(IndicatorPoint::new(current.time, round_to(sar, 4)));
    }

    result
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(i: i64, high: f64, low: f64) -> Bar {
        Bar::new(60 * i, (high + low) / 2.0, high, low, (high + low) / 2.0)
    }

    #[test]
    fn needs_two_bars() {
        assert!(sar_series(&[bar(0, 10.0, 9.0)], 0.02, 0.2).is_empty());
        assert!(sar_series(&[], 0.02, 0.2).is_empty());
    }

    #[test]
    fn one_point_per_bar_starting_at_first_low() {
        let bars = vec![bar(0, 10.0, 9.0), bar(1, 11.0, 10.0), bar(2, 12.0, 11.0)];
        let series = sar_series(&bars, 0.02, 0.2);
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].time, bars[0].time);
        assert!((series[0].value - 9.0).abs() < 1e-9);
    }

    #[test]
    fn clamp_holds_sar_at_prior_lows_in_an_uptrend() {
        // Rising highs pull the extreme point up, but the clamp against the
        // prior two lows keeps the SAR pinned at 9.0 for every step here.
        let bars = vec![bar(0, 10.0, 9.0), bar(1, 11.0, 10.0), bar(2, 12.0, 11.0)];
        let series = sar_series(&bars, 0.02, 0.2);
        assert!((series[1].value - 9.0).abs() < 1e-9);
        assert!((series[2].value - 9.0).abs() < 1e-9);
    }

    #[test]
    fn plunge_through_sar_flips_to_the_extreme() {
        let bars = vec![
            bar(0, 10.0, 9.0),
            bar(1, 11.0, 10.0),
            bar(2, 12.0, 11.0),
            bar(3, 9.0, 8.0),
        ];
        let series = sar_series(&bars, 0.02, 0.2);
        // Bar 3 advance gives 9.18; low 8.0 pierces it, so the SAR jumps to
        // the old extreme point 12.0 and the factor resets.
        assert!((series[3].value - 12.0).abs() < 1e-9);
    }

    #[test]
    fn downtrend_advances_toward_the_low_extreme() {
        let bars = vec![
            bar(0, 10.0, 9.0),
            bar(1, 11.0, 10.0),
            bar(2, 12.0, 11.0),
            bar(3, 9.0, 8.0),
            bar(4, 8.5, 7.5),
            bar(5, 8.2, 7.8),
        ];
        let series = sar_series(&bars, 0.02, 0.2);
        // After the flip: clamped at 12.0 against the prior highs, then the
        // fresh extreme 7.5 accelerates the descent to 11.82.
        assert!((series[4].value - 12.0).abs() < 1e-9);
        assert!((series[5].value - 11.82).abs() < 1e-9);
    }

    #[test]
    fn steady_uptrend_keeps_sar_below_the_lows() {
        let bars: Vec<Bar> = (0..40)
            .map(|i| bar(i, 101.0 + i as f64, 99.0 + i as f64))
            .collect();
        let series = sar_series(&bars, 0.02, 0.2);
        assert_eq!(series.len(), 40);
        for (point, b) in series.iter().zip(&bars).skip(1) {
            assert!(
                point.value <= b.low + 1e-9,
                "SAR {} above low {} at {}",
                point.value,
                b.low,
                b.time
            );
        }
    }
}
