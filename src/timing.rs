//! Tick resolution and tempo mapping
//!
//! All decoders share a fixed resolution of [`PPQN`] ticks per quarter
//! note. Tempo events decoded from the conductor track are collected into
//! a [`TempoMap`] so that the LFO post-pass can convert tick spans into
//! wall-clock time.

use serde::Serialize;

use crate::event::EventKind;
use crate::track::DecodedTrack;

/// Ticks per quarter note, shared by all formats.
pub const PPQN: u16 = 48;

/// Hardware LFO update rate in Hz.
pub const LFO_UPDATE_HZ: f64 = 62.5;

/// Tempo assumed before the first tempo event (120 bpm).
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// Convert beats per minute to microseconds per quarter note.
#[inline]
pub fn bpm_to_micros(bpm: f64) -> u32 {
    (60_000_000.0 / bpm).round() as u32
}

/// One tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TempoMapEntry {
    /// Tick the tempo takes effect at
    pub tick: u64,
    /// Microseconds per quarter note from this tick on
    pub micros_per_quarter: u32,
}

/// Tick-ordered tempo changes for one sequence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TempoMap {
    entries: Vec<TempoMapEntry>,
}

impl TempoMap {
    /// Empty map; lookups fall back to the 120 bpm default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tempo change, keeping entries tick-ordered. A second
    /// change at the same tick replaces the first.
    pub fn push(&mut self, tick: u64, micros_per_quarter: u32) {
        match self.entries.binary_search_by_key(&tick, |e| e.tick) {
            Ok(i) => self.entries[i].micros_per_quarter = micros_per_quarter,
            Err(i) => self.entries.insert(
                i,
                TempoMapEntry {
                    tick,
                    micros_per_quarter,
                },
            ),
        }
    }

    /// Build a map from the tempo events of a conductor track.
    pub fn from_track(track: &DecodedTrack) -> Self {
        let mut map = Self::new();
        for ev in &track.events {
            match ev.kind {
                EventKind::Tempo { micros_per_quarter } => {
                    map.push(ev.tick, micros_per_quarter);
                }
                EventKind::TempoBpm { bpm } if bpm > 0.0 => {
                    map.push(ev.tick, bpm_to_micros(bpm));
                }
                _ => {}
            }
        }
        map
    }

    /// Tempo in effect at `tick`.
    pub fn micros_per_quarter_at(&self, tick: u64) -> u32 {
        let mut current = DEFAULT_MICROS_PER_QUARTER;
        for entry in &self.entries {
            if entry.tick > tick {
                break;
            }
            current = entry.micros_per_quarter;
        }
        current
    }

    /// All tempo changes, tick-ordered.
    pub fn entries(&self) -> &[TempoMapEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tempo_before_first_entry() {
        let mut map = TempoMap::new();
        assert_eq!(map.micros_per_quarter_at(0), DEFAULT_MICROS_PER_QUARTER);
        map.push(96, 400_000);
        assert_eq!(map.micros_per_quarter_at(95), DEFAULT_MICROS_PER_QUARTER);
        assert_eq!(map.micros_per_quarter_at(96), 400_000);
        assert_eq!(map.micros_per_quarter_at(1000), 400_000);
    }

    #[test]
    fn test_same_tick_replaces() {
        let mut map = TempoMap::new();
        map.push(0, 500_000);
        map.push(0, 250_000);
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.micros_per_quarter_at(0), 250_000);
    }

    #[test]
    fn test_bpm_conversion() {
        assert_eq!(bpm_to_micros(120.0), 500_000);
        assert_eq!(bpm_to_micros(60.0), 1_000_000);
    }
}
