// =============================================================================
// Volume-Driven Indicators (VWAP / OBV / AVL)
// =============================================================================
//
// These kinds consume the volume series alongside the bars. The two series
// are joined by bar time, never by raw position; any bar whose time has no
// matching volume entry is a data-integrity error (`SeriesMismatch`), not a
// silent misalignment. A volume series longer than the bar slice is fine,
// which is what the prefix-based single-point lookups rely on.
// =============================================================================

use crate::error::{MarketError, Result};
use crate::types::{Bar, VolumeBar};

use super::{round_to, IndicatorPoint};

/// Join `volumes` onto `bars` by time, yielding one total per bar.
fn join_volumes(bars: &[Bar], volumes: &[VolumeBar]) -> Result<Vec<f64>> {
    if volumes.len() < bars.len() {
        return Err(MarketError::SeriesMismatch {
            time: bars[volumes.len()].time,
        });
    }
    bars.iter()
        .zip(volumes)
        .map(|(bar, vol)| {
            if bar.time == vol.time {
                Ok(vol.total)
            } else {
                Err(MarketError::SeriesMismatch { time: bar.time })
            }
        })
        .collect()
}

/// Sliding-window volume-weighted average price. One point per bar from the
/// first; a window with zero traded volume falls back to the bar's close.
/// 4 decimals.
pub fn vwap_series(bars: &[Bar], volumes: &[VolumeBar], window: usize) -> Result<Vec<IndicatorPoint>> {
    if window == 0 {
        return Ok(Vec::new());
    }
    let totals = join_volumes(bars, volumes)?;

    let mut result = Vec::with_capacity(bars.len());
    for i in 0..bars.len() {
        let start = (i + 1).saturating_sub(window);
        let mut tpv = 0.0;
        let mut vol = 0.0;
        for j in start..=i {
            let typical = (bars[j].high + bars[j].low + bars[j].close) / 3.0;
            tpv += typical * totals[j];
            vol += totals[j];
        }
        let vwap = if vol > 0.0 { tpv / vol } else { bars[i].close };
        result.push(IndicatorPoint::new(bars[i].time, round_to(vwap, 4)));
    }
    Ok(result)
}

/// On-balance volume: cumulative total added on an up close, subtracted on a
/// down close, untouched on a tie. Seeded at 0 on the first bar. 2 decimals.
pub fn obv_series(bars: &[Bar], volumes: &[VolumeBar]) -> Result<Vec<IndicatorPoint>> {
    if bars.len() < 2 {
        return Ok(Vec::new());
    }
    let totals = join_volumes(bars, volumes)?;

    let mut result = Vec::with_capacity(bars.len());
    result.push(IndicatorPoint::new(bars[0].time, 0.0));

    let mut obv = 0.0_f64;
    for i in 1..bars.len() {
        if bars[i].close > bars[i - 1].close {
            obv += totals[i];
        } else if bars[i].close < bars[i - 1].close {
            obv -= totals[i];
        }
        result.push(IndicatorPoint::new(bars[i].time, round_to(obv, 2)));
    }
    Ok(result)
}

/// Average volume line: simple mean of totals over `period`. 2 decimals.
pub fn avl_series(bars: &[Bar], volumes: &[VolumeBar], period: usize) -> Result<Vec<IndicatorPoint>> {
    if period == 0 || bars.len() < period {
        return Ok(Vec::new());
    }
    let totals = join_volumes(bars, volumes)?;

    let mut result = Vec::with_capacity(bars.len() - period + 1);
    for i in (period - 1)..bars.len() {
        let avg = totals[i + 1 - period..=i].iter().sum::<f64>() / period as f64;
        result.push(IndicatorPoint::new(bars[i].time, round_to(avg, 2)));
    }
    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_around(i: i64, close: f64) -> Bar {
        Bar::new(60 * i, close, close + 1.0, close - 1.0, close)
    }

    fn volumes_for(bars: &[Bar], totals: &[f64]) -> Vec<VolumeBar> {
        bars.iter()
            .zip(totals)
            .map(|(b, &t)| VolumeBar::new(b.time, t, t / 2.0, t * b.close))
            .collect()
    }

    #[test]
    fn diverging_times_are_an_integrity_error() {
        let bars = vec![bar_around(0, 10.0), bar_around(1, 11.0)];
        let mut volumes = volumes_for(&bars, &[5.0, 6.0]);
        volumes[1].time += 1;
        match obv_series(&bars, &volumes) {
            Err(MarketError::SeriesMismatch { time }) => assert_eq!(time, bars[1].time),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn short_volume_series_is_an_integrity_error() {
        let bars = vec![bar_around(0, 10.0), bar_around(1, 11.0), bar_around(2, 12.0)];
        let volumes = volumes_for(&bars[..2], &[5.0, 6.0]);
        match avl_series(&bars, &volumes, 2) {
            Err(MarketError::SeriesMismatch { time }) => assert_eq!(time, bars[2].time),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn longer_volume_series_joins_a_bar_prefix() {
        let bars = vec![bar_around(0, 10.0), bar_around(1, 11.0), bar_around(2, 12.0)];
        let volumes = volumes_for(&bars, &[5.0, 6.0, 7.0]);
        let series = obv_series(&bars[..2], &volumes).unwrap();
        assert_eq!(series.len(), 2);
    }

    // ---- VWAP --------------------------------------------------------------

    #[test]
    fn vwap_with_uniform_volume_is_the_window_mean() {
        // Highs/lows bracket the close, so the typical price equals the close.
        let bars: Vec<Bar> = [1.0, 2.0, 3.0, 4.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| bar_around(i as i64, c))
            .collect();
        let volumes = volumes_for(&bars, &[2.0, 2.0, 2.0, 2.0]);
        let series = vwap_series(&bars, &volumes, 3).unwrap();
        assert_eq!(series.len(), 4);
        assert!((series[0].value - 1.0).abs() < 1e-9);
        assert!((series[1].value - 1.5).abs() < 1e-9);
        assert!((series[2].value - 2.0).abs() < 1e-9);
        assert!((series[3].value - 3.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_weights_by_traded_volume() {
        let bars: Vec<Bar> = [1.0, 2.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| bar_around(i as i64, c))
            .collect();
        let volumes = volumes_for(&bars, &[1.0, 3.0]);
        let series = vwap_series(&bars, &volumes, 50).unwrap();
        // (1*1 + 2*3) / 4 = 1.75
        assert!((series[1].value - 1.75).abs() < 1e-9);
    }

    #[test]
    fn vwap_falls_back_to_close_on_a_dead_window() {
        let bars: Vec<Bar> = [10.0, 20.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| bar_around(i as i64, c))
            .collect();
        let volumes = volumes_for(&bars, &[0.0, 0.0]);
        let series = vwap_series(&bars, &volumes, 50).unwrap();
        assert!((series[0].value - 10.0).abs() < 1e-9);
        assert!((series[1].value - 20.0).abs() < 1e-9);
    }

    // ---- OBV ---------------------------------------------------------------

    #[test]
    fn obv_accumulates_by_close_direction() {
        let bars = vec![
            bar_around(0, 10.0),
            bar_around(1, 11.0),
            bar_around(2, 11.0),
            bar_around(3, 9.0),
        ];
        let volumes = volumes_for(&bars, &[5.0, 6.0, 7.0, 8.0]);
        let series = obv_series(&bars, &volumes).unwrap();
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0.0, 6.0, 6.0, -2.0]);
    }

    #[test]
    fn obv_needs_two_bars() {
        let bars = vec![bar_around(0, 10.0)];
        let volumes = volumes_for(&bars, &[5.0]);
        assert!(obv_series(&bars, &volumes).unwrap().is_empty());
    }

    // ---- AVL ---------------------------------------------------------------

    #[test]
    fn avl_is_the_mean_volume_over_the_window() {
        let bars = vec![bar_around(0, 1.0), bar_around(1, 2.0), bar_around(2, 3.0)];
        let volumes = volumes_for(&bars, &[5.0, 6.0, 7.0]);
        let series = avl_series(&bars, &volumes, 2).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].time, bars[1].time);
        assert!((series[0].value - 5.5).abs() < 1e-9);
        assert!((series[1].value - 6.5).abs() < 1e-9);
    }

    #[test]
    fn avl_short_input_gives_empty_series() {
        let bars = vec![bar_around(0, 1.0)];
        let volumes = volumes_for(&bars, &[5.0]);
        assert!(avl_series(&bars, &volumes, 20).unwrap().is_empty());
    }
}
