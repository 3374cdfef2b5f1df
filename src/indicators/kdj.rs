// =============================================================================
// KDJ Stochastic Oscillator
// =============================================================================
//
// RSV over the window = (close - lowestLow) / (highestHigh - lowestLow) * 100;
// a flat window (highest == lowest) reads as a neutral 50 instead of
// poisoning the series with a 0/0.
//
//   K = (2 * prevK + RSV) / 3      seeded at 50
//   D = (2 * prevD + K) / 3        seeded at 50
//   J = 3K - 2D
//
// The recurrence runs on unrounded state; output points round to 2 decimals.
// =============================================================================

use crate::types::Bar;

use super::{round_to, IndicatorPoint};

/// The three KDJ lines, index-aligned with each other.
#[derive(Debug, Clone, Default)]
pub struct KdjSeries {
    pub k: Vec<IndicatorPoint>,
    pub d: Vec<IndicatorPoint>,
    pub j: Vec<IndicatorPoint>,
}

/// Compute KDJ for `bars` over the RSV look-back `period`.
pub fn kdj_series(bars: &[Bar], period: usize) -> KdjSeries {
    if period == 0 || bars.len() < period {
        return KdjSeries::default();
    }

    let mut series = KdjSeries::default();
    let mut k = 50.0_f64;
    let mut d = 50.0_f64;

    for i in (period - 1)..bars.len() {
        let window = &bars[i + 1 - period..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let rsv = if highest > lowest {
            (bars[i].close - lowest) / (highest - lowest) * 100.0
        } else {
            50.0
        };

        k = (2.0 * k + rsv) / 3.0;
        d = (2.0 * d + k) / 3.0;
        let j = 3.0 * k - 2.0 * d;

        let time = bars[i].time;
        series.k.push(IndicatorPoint::new(time, round_to(k, 2)));
        series.d.push(IndicatorPoint::new(time, round_to(d, 2)));
        series.j.push(IndicatorPoint::new(time, round_to(j, 2)));
    }

    series
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(60 * i, close, high, low, close)
    }

    #[test]
    fn short_input_gives_empty_lines() {
        let bars = vec![bar(0, 11.0, 9.0, 10.0)];
        let series = kdj_series(&bars, 9);
        assert!(series.k.is_empty());
        assert!(series.d.is_empty());
        assert!(series.j.is_empty());
    }

    #[test]
    fn hand_computed_recurrence_from_the_50_seed() {
        let bars = vec![
            bar(0, 11.0, 9.0, 10.0),
            bar(1, 13.0, 10.0, 12.0),
            bar(2, 12.0, 8.0, 9.0),
        ];
        let series = kdj_series(&bars, 2);
        assert_eq!(series.k.len(), 2);
        assert_eq!(series.k[0].time, bars[1].time);

        // RSV 75: K = 175/3, D = 475/9, J = 625/9.
        assert!((series.k[0].value - 58.33).abs() < 1e-9);
        assert!((series.d[0].value - 52.78).abs() < 1e-9);
        assert!((series.j[0].value - 69.44).abs() < 1e-9);

        // RSV 20: K = 410/9, D = 1360/27, J = 970/27.
        assert!((series.k[1].value - 45.56).abs() < 1e-9);
        assert!((series.d[1].value - 50.37).abs() < 1e-9);
        assert!((series.j[1].value - 35.93).abs() < 1e-9);
    }

    #[test]
    fn flat_window_stays_neutral() {
        let bars: Vec<Bar> = (0..15).map(|i| bar(i, 100.0, 100.0, 100.0)).collect();
        let series = kdj_series(&bars, 9);
        for i in 0..series.k.len() {
            assert!((series.k[i].value - 50.0).abs() < 1e-9);
            assert!((series.d[i].value - 50.0).abs() < 1e-9);
            assert!((series.j[i].value - 50.0).abs() < 1e-9);
        }
    }

    #[test]
    fn k_and_d_stay_inside_the_band() {
        let bars: Vec<Bar> = (0..50)
            .map(|i| {
                let c = 100.0 + (i as f64 * 1.3).sin() * 10.0;
                bar(i, c + 2.0, c - 2.0, c)
            })
            .collect();
        let series = kdj_series(&bars, 9);
        for i in 0..series.k.len() {
            assert!((0.0..=100.0).contains(&series.k[i].value));
            assert!((0.0..=100.0).contains(&series.d[i].value));
        }
    }
}
