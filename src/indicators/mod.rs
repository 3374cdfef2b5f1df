// =============================================================================
// Indicator Engine
// =============================================================================
//
// Pure, side-effect-free indicator transforms over a bar series. Every
// transform recomputes from the raw bars it is handed; nothing here holds
// state between calls, so a full recompute and an incremental lookup can
// never disagree.
//
// Kinds form a closed enumeration. Selection by name goes through
// `IndicatorKind::parse`, which returns `None` for anything unrecognized so
// the caller can warn and ignore instead of guessing.
//
// Rounding convention: price-like values round to 8 decimals below magnitude
// 1 and to 4 above; oscillator outputs use the per-kind precision noted on
// each transform.
// =============================================================================

pub mod boll;
pub mod cci;
pub mod ema;
pub mod kdj;
pub mod ma;
pub mod macd;
pub mod rsi;
pub mod sar;
pub mod trix;
pub mod volume;
pub mod wma;

use serde::Serialize;

use crate::error::Result;
use crate::types::{Bar, VolumeBar};

// =============================================================================
// Output shapes
// =============================================================================

/// One point of an indicator line, stamped with the bar time it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorPoint {
    pub time: i64,
    pub value: f64,
}

impl IndicatorPoint {
    pub fn new(time: i64, value: f64) -> Self {
        Self { time, value }
    }
}

/// A labelled line inside a multi-line indicator (e.g. `MA7` or `SIGNAL`).
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorLine {
    pub label: String,
    pub points: Vec<IndicatorPoint>,
}

impl IndicatorLine {
    pub fn new(label: impl Into<String>, points: Vec<IndicatorPoint>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }
}

/// Full output of one indicator computation.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IndicatorOutput {
    Single(Vec<IndicatorPoint>),
    Multi(Vec<IndicatorLine>),
}

/// Single-point readout, for crosshair-style lookups.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Single(f64),
    Multi(Vec<LabeledValue>),
}

#[derive(Debug, Clone, Serialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: f64,
}

impl LabeledValue {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

// =============================================================================
// IndicatorKind
// =============================================================================

/// Closed set of supported indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Ma,
    Ema,
    Boll,
    Sar,
    Rsi,
    Macd,
    Kdj,
    Cci,
    Wma,
    Vwap,
    Obv,
    Avl,
    Trix,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 13] = [
        IndicatorKind::Ma,
        IndicatorKind::Ema,
        IndicatorKind::Boll,
        IndicatorKind::Sar,
        IndicatorKind::Rsi,
        IndicatorKind::Macd,
        IndicatorKind::Kdj,
        IndicatorKind::Cci,
        IndicatorKind::Wma,
        IndicatorKind::Vwap,
        IndicatorKind::Obv,
        IndicatorKind::Avl,
        IndicatorKind::Trix,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Ma => "MA",
            IndicatorKind::Ema => "EMA",
            IndicatorKind::Boll => "BOLL",
            IndicatorKind::Sar => "SAR",
            IndicatorKind::Rsi => "RSI",
            IndicatorKind::Macd => "MACD",
            IndicatorKind::Kdj => "KDJ",
            IndicatorKind::Cci => "CCI",
            IndicatorKind::Wma => "WMA",
            IndicatorKind::Vwap => "VWAP",
            IndicatorKind::Obv => "OBV",
            IndicatorKind::Avl => "AVL",
            IndicatorKind::Trix => "TRIX",
        }
    }

    /// Case-insensitive name lookup. `None` for anything outside the closed
    /// set; callers warn and ignore.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "MA" => Some(IndicatorKind::Ma),
            "EMA" => Some(IndicatorKind::Ema),
            "BOLL" => Some(IndicatorKind::Boll),
            "SAR" => Some(IndicatorKind::Sar),
            "RSI" => Some(IndicatorKind::Rsi),
            "MACD" => Some(IndicatorKind::Macd),
            "KDJ" => Some(IndicatorKind::Kdj),
            "CCI" => Some(IndicatorKind::Cci),
            "WMA" => Some(IndicatorKind::Wma),
            "VWAP" => Some(IndicatorKind::Vwap),
            "OBV" => Some(IndicatorKind::Obv),
            "AVL" => Some(IndicatorKind::Avl),
            "TRIX" => Some(IndicatorKind::Trix),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Compute one indicator's full series with its default parameters.
///
/// Volume-driven kinds (VWAP, OBV, AVL) join `volumes` to `bars` by time and
/// fail with `SeriesMismatch` if the series diverge; everything else ignores
/// `volumes`.
pub fn compute(kind: IndicatorKind, bars: &[Bar], volumes: &[VolumeBar]) -> Result<IndicatorOutput> {
    let output = match kind {
        IndicatorKind::Ma => IndicatorOutput::Multi(
            [7, 25, 99]
                .iter()
                .map(|&p| IndicatorLine::new(format!("MA{p}"), ma::ma_series(bars, p)))
                .collect(),
        ),
        IndicatorKind::Ema => IndicatorOutput::Multi(
            [12, 26]
                .iter()
                .map(|&p| IndicatorLine::new(format!("EMA{p}"), ema::ema_series(bars, p)))
                .collect(),
        ),
        IndicatorKind::Wma => IndicatorOutput::Multi(
            [7, 25, 99]
                .iter()
                .map(|&p| IndicatorLine::new(format!("WMA{p}"), wma::wma_series(bars, p)))
                .collect(),
        ),
        IndicatorKind::Boll => {
            let series = boll::boll_series(bars, 20, 2.0);
            IndicatorOutput::Multi(vec![
                IndicatorLine::new("UPPER", series.upper),
                IndicatorLine::new("MIDDLE", series.middle),
                IndicatorLine::new("LOWER", series.lower),
            ])
        }
        IndicatorKind::Sar => IndicatorOutput::Single(sar::sar_series(bars, 0.02, 0.2)),
        IndicatorKind::Rsi => IndicatorOutput::Single(rsi::rsi_series(bars, 14)),
        IndicatorKind::Macd => {
            let series = macd::macd_series(bars, 12, 26, 9);
            IndicatorOutput::Multi(vec![
                IndicatorLine::new("MACD", series.macd),
                IndicatorLine::new("SIGNAL", series.signal),
                IndicatorLine::new("HISTOGRAM", series.histogram),
            ])
        }
        IndicatorKind::Kdj => {
            let series = kdj::kdj_series(bars, 9);
            IndicatorOutput::Multi(vec![
                IndicatorLine::new("K", series.k),
                IndicatorLine::new("D", series.d),
                IndicatorLine::new("J", series.j),
            ])
        }
        IndicatorKind::Cci => IndicatorOutput::Single(cci::cci_series(bars, 14)),
        IndicatorKind::Vwap => IndicatorOutput::Single(volume::vwap_series(bars, volumes, 50)?),
        IndicatorKind::Obv => IndicatorOutput::Single(volume::obv_series(bars, volumes)?),
        IndicatorKind::Avl => IndicatorOutput::Single(volume::avl_series(bars, volumes, 20)?),
        IndicatorKind::Trix => IndicatorOutput::Single(trix::trix_series(bars, 14)),
    };
    Ok(output)
}

/// Single-point lookup at `index` with the kind's default parameters.
///
/// MA, EMA, and BOLL take the direct window/recurrence path; every other
/// kind computes its series over the prefix ending at `index` and reads the
/// last point, which is identical because all transforms are causal. An
/// out-of-range index or an under-filled window yields the 0 sentinel.
pub fn value_at(
    kind: IndicatorKind,
    bars: &[Bar],
    volumes: &[VolumeBar],
    index: usize,
) -> Result<IndicatorValue> {
    if index >= bars.len() {
        return Ok(zero_value(kind));
    }

    let value = match kind {
        IndicatorKind::Ma => IndicatorValue::Multi(
            [7, 25, 99]
                .iter()
                .map(|&p| LabeledValue::new(format!("MA{p}"), ma::ma_value_at(bars, index, p)))
                .collect(),
        ),
        IndicatorKind::Ema => IndicatorValue::Multi(
            [12, 26]
                .iter()
                .map(|&p| LabeledValue::new(format!("EMA{p}"), ema::ema_value_at(bars, index, p)))
                .collect(),
        ),
        IndicatorKind::Boll => {
            let v = boll::boll_value_at(bars, index, 20, 2.0);
            IndicatorValue::Multi(vec![
                LabeledValue::new("UPPER", v.upper),
                LabeledValue::new("MIDDLE", v.middle),
                LabeledValue::new("LOWER", v.lower),
            ])
        }
        other => {
            let prefix = &bars[..=index];
            match compute(other, prefix, volumes)? {
                IndicatorOutput::Single(points) => {
                    IndicatorValue::Single(points.last().map(|p| p.value).unwrap_or(0.0))
                }
                IndicatorOutput::Multi(lines) => IndicatorValue::Multi(
                    lines
                        .iter()
                        .map(|line| {
                            LabeledValue::new(
                                line.label.clone(),
                                line.points.last().map(|p| p.value).unwrap_or(0.0),
                            )
                        })
                        .collect(),
                ),
            }
        }
    };
    Ok(value)
}

fn zero_value(kind: IndicatorKind) -> IndicatorValue {
    match kind {
        IndicatorKind::Ma => IndicatorValue::Multi(
            [7, 25, 99]
                .iter()
                .map(|&p| LabeledValue::new(format!("MA{p}"), 0.0))
                .collect(),
        ),
        IndicatorKind::Ema => IndicatorValue::Multi(
            [12, 26]
                .iter()
                .map(|&p| LabeledValue::new(format!("EMA{p}"), 0.0))
                .collect(),
        ),
        IndicatorKind::Boll => IndicatorValue::Multi(vec![
            LabeledValue::new("UPPER", 0.0),
            LabeledValue::new("MIDDLE", 0.0),
            LabeledValue::new("LOWER", 0.0),
        ]),
        IndicatorKind::Macd => IndicatorValue::Multi(vec![
            LabeledValue::new("MACD", 0.0),
            LabeledValue::new("SIGNAL", 0.0),
            LabeledValue::new("HISTOGRAM", 0.0),
        ]),
        IndicatorKind::Kdj => IndicatorValue::Multi(vec![
            LabeledValue::new("K", 0.0),
            LabeledValue::new("D", 0.0),
            LabeledValue::new("J", 0.0),
        ]),
        IndicatorKind::Wma => IndicatorValue::Multi(
            [7, 25, 99]
                .iter()
                .map(|&p| LabeledValue::new(format!("WMA{p}"), 0.0))
                .collect(),
        ),
        _ => IndicatorValue::Single(0.0),
    }
}

// =============================================================================
// Rounding helpers
// =============================================================================

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// 8 decimals below magnitude 1, 4 decimals at or above it.
pub(crate) fn round_by_magnitude(value: f64) -> f64 {
    if value.abs() < 1.0 {
        round_to(value, 8)
    } else {
        round_to(value, 4)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64;
                Bar::new(60 * i as i64, c - 0.5, c + 1.0, c - 1.0, c)
            })
            .collect()
    }

    fn ramp_volumes(bars: &[Bar]) -> Vec<VolumeBar> {
        bars.iter()
            .map(|b| VolumeBar::new(b.time, 10.0, 6.0, 10.0 * b.close))
            .collect()
    }

    // ---- kind parsing ------------------------------------------------------

    #[test]
    fn parse_accepts_known_names_case_insensitively() {
        assert_eq!(IndicatorKind::parse("ma"), Some(IndicatorKind::Ma));
        assert_eq!(IndicatorKind::parse("MACD"), Some(IndicatorKind::Macd));
        assert_eq!(IndicatorKind::parse(" boll "), Some(IndicatorKind::Boll));
        assert_eq!(IndicatorKind::parse("vwap"), Some(IndicatorKind::Vwap));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert_eq!(IndicatorKind::parse("SUPERTREND"), None);
        assert_eq!(IndicatorKind::parse(""), None);
    }

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in IndicatorKind::ALL {
            assert_eq!(IndicatorKind::parse(kind.as_str()), Some(kind));
        }
    }

    // ---- dispatch ----------------------------------------------------------

    #[test]
    fn compute_produces_output_for_every_kind() {
        let bars = ramp_bars(120);
        let volumes = ramp_volumes(&bars);
        for kind in IndicatorKind::ALL {
            let output = compute(kind, &bars, &volumes).unwrap();
            match output {
                IndicatorOutput::Single(points) => {
                    assert!(!points.is_empty(), "{kind} produced no points")
                }
                IndicatorOutput::Multi(lines) => {
                    assert!(!lines.is_empty(), "{kind} produced no lines");
                    for line in lines {
                        assert!(!line.points.is_empty(), "{kind}/{} empty", line.label);
                    }
                }
            }
        }
    }

    #[test]
    fn value_at_matches_full_series_tail() {
        let bars = ramp_bars(80);
        let volumes = ramp_volumes(&bars);
        let last = bars.len() - 1;

        for kind in [IndicatorKind::Rsi, IndicatorKind::Cci, IndicatorKind::Obv] {
            let series = match compute(kind, &bars, &volumes).unwrap() {
                IndicatorOutput::Single(points) => points,
                _ => unreachable!(),
            };
            let at = match value_at(kind, &bars, &volumes, last).unwrap() {
                IndicatorValue::Single(v) => v,
                _ => unreachable!(),
            };
            assert!(
                (series.last().unwrap().value - at).abs() < 1e-9,
                "{kind} tail mismatch"
            );
        }
    }

    #[test]
    fn value_at_out_of_range_yields_sentinel() {
        let bars = ramp_bars(10);
        let volumes = ramp_volumes(&bars);
        match value_at(IndicatorKind::Rsi, &bars, &volumes, 500).unwrap() {
            IndicatorValue::Single(v) => assert_eq!(v, 0.0),
            _ => panic!("expected single value"),
        }
    }

    // ---- rounding ----------------------------------------------------------

    #[test]
    fn rounding_switches_precision_at_magnitude_one() {
        assert_eq!(round_by_magnitude(0.123456789), 0.12345679);
        assert_eq!(round_by_magnitude(1.123456789), 1.1235);
        assert_eq!(round_by_magnitude(-0.987654321), -0.98765432);
        assert_eq!(round_by_magnitude(12345.000049), 12345.0);
    }

    #[test]
    fn round_to_fixed_decimals() {
        assert_eq!(round_to(3.14159, 2), 3.14);
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(-7.3338, 2), -7.33);
    }
}
