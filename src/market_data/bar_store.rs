// =============================================================================
// BarStore -- time-ordered bar/volume series for one (instrument, interval)
// =============================================================================
//
// Single source of truth for the current view. Bars and volume bars move in
// lock-step: element i of each series shares one `time`. Times strictly
// increase; the newest element may be refreshed in place while its bar is
// still forming. A full historical load replaces the whole series, stream
// updates land one bar at a time through `upsert`.
// =============================================================================

use crate::types::{Bar, KlinePayload, VolumeBar};

/// What an `upsert` did to the series. The facade picks its notification
/// shape off this: appends and last-bar refreshes travel as deltas, an
/// in-place correction forces a full snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new bar extended the series.
    Appended,
    /// The newest bar was refreshed in place (in-progress update).
    ReplacedLast,
    /// An older bar with a matching time was corrected in place.
    Rewrote,
    /// The bar predates the series and matches no stored time; dropped.
    Ignored,
}

pub struct BarStore {
    bars: Vec<Bar>,
    volumes: Vec<VolumeBar>,
    is_time_series: bool,
    capacity: usize,
}

impl BarStore {
    /// Create an empty store retaining at most `capacity` bars.
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: Vec::new(),
            volumes: Vec::new(),
            is_time_series: false,
            capacity,
        }
    }

    /// Swap in a freshly fetched payload, dropping whatever was held before.
    /// Oldest bars are trimmed if the payload exceeds capacity.
    pub fn replace_all(&mut self, payload: KlinePayload) {
        self.bars = payload.bars;
        self.volumes = payload.volume_bars;
        self.is_time_series = payload.is_time_series;
        self.trim();
    }

    /// Insert one live update, keeping times strictly increasing.
    ///
    /// * time equal to the newest bar: refresh it in place.
    /// * time beyond the newest bar: append, trimming the oldest past capacity.
    /// * time matching an older bar: rewrite that element.
    /// * anything else is stale and dropped.
    pub fn upsert(&mut self, bar: Bar, volume: VolumeBar) -> UpsertOutcome {
        debug_assert_eq!(bar.time, volume.time);

        let last_time = match self.bars.last() {
            Some(last) => last.time,
            None => {
                self.bars.push(bar);
                self.volumes.push(volume);
                return UpsertOutcome::Appended;
            }
        };

        if bar.time == last_time {
            let idx = self.bars.len() - 1;
            self.bars[idx] = bar;
            self.volumes[idx] = volume;
            UpsertOutcome::ReplacedLast
        } else if bar.time > last_time {
            self.bars.push(bar);
            self.volumes.push(volume);
            self.trim();
            UpsertOutcome::Appended
        } else {
            match self.bars.binary_search_by_key(&bar.time, |b| b.time) {
                Ok(idx) => {
                    self.bars[idx] = bar;
                    self.volumes[idx] = volume;
                    UpsertOutcome::Rewrote
                }
                Err(_) => UpsertOutcome::Ignored,
            }
        }
    }

    /// Clone of the full current state.
    pub fn snapshot(&self) -> KlinePayload {
        KlinePayload {
            bars: self.bars.clone(),
            volume_bars: self.volumes.clone(),
            is_time_series: self.is_time_series,
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn volumes(&self) -> &[VolumeBar] {
        &self.volumes
    }

    pub fn is_time_series(&self) -> bool {
        self.is_time_series
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_time(&self) -> Option<i64> {
        self.bars.last().map(|b| b.time)
    }

    fn trim(&mut self) {
        if self.bars.len() > self.capacity {
            let overflow = self.bars.len() - self.capacity;
            self.bars.drain(..overflow);
            self.volumes.drain(..overflow);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
