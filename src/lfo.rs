//! LFO reconstruction post-pass
//!
//! The drivers implement vibrato and tremolo with a shared triangle-wave
//! LFO updated at 62.5 Hz. Decoders only record the selector markers; this
//! pass replays the LFO against the tempo map and synthesizes explicit
//! pitch-bend and expression automation on a 16-tick grid, so the output
//! stream needs no knowledge of the hardware modulator.
//!
//! Event order within one tick is priority-driven: tempo changes first,
//! then state markers and bend-range changes, then bends and expression.

use crate::event::{DecodedEvent, EventKind, MarkerKind};
use crate::timing::{TempoMap, LFO_UPDATE_HZ, PPQN};
use crate::track::DecodedTrack;

/// Full envelope span of one quarter of the triangle wave.
const ENVELOPE_SPAN: u32 = 0x0100_0000;

/// Ticks between synthesized automation points.
const MICRO_STEP_TICKS: u64 = 16;

/// Vibrato depth selector to peak deviation in cents.
const VIBRATO_DEPTH_CENTS: [u16; 16] = [
    0, 5, 10, 14, 20, 28, 40, 56, 80, 113, 160, 226, 320, 452, 640, 905,
];

/// Tremolo depth selector to peak expression attenuation.
const TREMOLO_DEPTH: [u8; 16] = [
    0, 2, 4, 6, 9, 13, 18, 25, 35, 48, 64, 80, 96, 110, 120, 127,
];

/// Rate selector to envelope units per 62.5 Hz update.
const LFO_RATE_UNITS: [u32; 16] = [
    0x4000, 0x8000, 0xC000, 0x10000, 0x18000, 0x20000, 0x30000, 0x40000, 0x60000, 0x80000,
    0xC0000, 0x100000, 0x180000, 0x200000, 0x300000, 0x400000,
];

const DEFAULT_RATE_INDEX: usize = 3;

/// Quarter of the triangle wave the envelope is traversing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LfoPhase {
    RisingFromMid,
    FallingFromPeak,
    FallingFromMid,
    RisingFromBottom,
}

impl LfoPhase {
    fn next(self) -> Self {
        match self {
            LfoPhase::RisingFromMid => LfoPhase::FallingFromPeak,
            LfoPhase::FallingFromPeak => LfoPhase::FallingFromMid,
            LfoPhase::FallingFromMid => LfoPhase::RisingFromBottom,
            LfoPhase::RisingFromBottom => LfoPhase::RisingFromMid,
        }
    }
}

/// Replayed modulator state for one track.
struct LfoState {
    phase: LfoPhase,
    envelope: u32,
    rate_index: usize,
    vibrato_cents: f64,
    tremolo_depth: u8,
    manual_cents: f64,
}

impl LfoState {
    fn new() -> Self {
        Self {
            phase: LfoPhase::RisingFromMid,
            envelope: 0,
            rate_index: DEFAULT_RATE_INDEX,
            vibrato_cents: 0.0,
            tremolo_depth: 0,
            manual_cents: 0.0,
        }
    }

    fn active(&self) -> bool {
        self.vibrato_cents > 0.0 || self.tremolo_depth > 0
    }

    /// Advance the envelope by `units`, wrapping through the phases.
    fn advance(&mut self, units: u64) {
        let mut remaining = units;
        loop {
            let to_edge = u64::from(ENVELOPE_SPAN - self.envelope);
            if remaining < to_edge {
                self.envelope += remaining as u32;
                return;
            }
            remaining -= to_edge;
            self.envelope = 0;
            self.phase = self.phase.next();
        }
    }

    /// Signed displacement from the wave midpoint, in envelope units.
    fn signed(&self) -> i64 {
        let env = i64::from(self.envelope);
        let span = i64::from(ENVELOPE_SPAN);
        match self.phase {
            LfoPhase::RisingFromMid => env,
            LfoPhase::FallingFromPeak => span - env,
            LfoPhase::FallingFromMid => -env,
            LfoPhase::RisingFromBottom => -(span - env),
        }
    }

    /// Instantaneous LFO pitch deviation in cents.
    fn lfo_cents(&self) -> f64 {
        self.signed() as f64 / f64::from(ENVELOPE_SPAN) * self.vibrato_cents
    }

    /// Bend range in whole semitones needed to express the current
    /// vibrato depth plus two semitones of manual-bend headroom.
    fn needed_range(&self) -> u8 {
        ((self.vibrato_cents + 200.0) / 100.0).ceil() as u8
    }

    fn reset(&mut self) {
        self.phase = LfoPhase::RisingFromMid;
        self.envelope = 0;
    }

    /// 14-bit bend value for the combined LFO and manual deviation.
    fn bend_value(&self, range_semitones: u8) -> u16 {
        let range_cents = f64::from(range_semitones) * 100.0;
        let cents = self.lfo_cents() + self.manual_cents;
        let raw = (cents / range_cents * 8192.0).round() as i32 + 8192;
        raw.clamp(0, 16383) as u16
    }

    /// Expression value attenuated by the tremolo wave.
    fn expression_value(&self) -> u8 {
        let atten =
            self.signed().unsigned_abs() as f64 / f64::from(ENVELOPE_SPAN)
                * f64::from(self.tremolo_depth);
        (127.0 - atten).round().clamp(0.0, 127.0) as u8
    }
}

/// One tick-ordered control point driving the replay.
enum Control {
    Tempo(u32),
    Marker { kind: MarkerKind, data: [u8; 2], offset: u32, len: u32 },
    End,
}

/// Expand the LFO markers of every track into explicit automation.
pub fn run_post_pass(tracks: &mut [DecodedTrack], tempo_map: &TempoMap) {
    for track in tracks.iter_mut() {
        expand_track(track, tempo_map);
    }
}

fn expand_track(track: &mut DecodedTrack, tempo_map: &TempoMap) {
    let mut points: Vec<(u64, Control)> = Vec::new();
    for entry in tempo_map.entries() {
        points.push((entry.tick, Control::Tempo(entry.micros_per_quarter)));
    }
    for ev in &track.events {
        if let EventKind::Marker { kind, data } = ev.kind {
            if kind != MarkerKind::Tie {
                points.push((
                    ev.tick,
                    Control::Marker {
                        kind,
                        data,
                        offset: ev.offset,
                        len: ev.len,
                    },
                ));
            }
        }
    }
    points.push((track.total_ticks, Control::End));
    // Tempo entries precede markers at the same tick because they were
    // pushed first and the sort is stable.
    points.sort_by_key(|(tick, _)| *tick);

    let mut state = LfoState::new();
    let mut mpq = tempo_map.micros_per_quarter_at(0);
    let mut range_semitones = 2u8;
    let mut cur_tick = 0u64;
    let mut src = (track.start, 0u32);
    let mut synth: Vec<DecodedEvent> = Vec::new();

    let emit_bend = |synth: &mut Vec<DecodedEvent>,
                         state: &LfoState,
                         src: (u32, u32),
                         tick: u64,
                         range: u8| {
        synth.push(DecodedEvent::new(
            src.0,
            src.1,
            tick,
            EventKind::PitchBend {
                value: state.bend_value(range),
            },
        ));
    };

    for (tick, control) in points {
        // Synthesize automation across the gap on a fixed tick grid.
        if state.active() {
            let units_per_step = {
                let micros = MICRO_STEP_TICKS as f64 * f64::from(mpq) / f64::from(PPQN);
                let lfo_ticks = micros * LFO_UPDATE_HZ / 1_000_000.0;
                (lfo_ticks * f64::from(LFO_RATE_UNITS[state.rate_index])).round() as u64
            };
            // The gap excludes its endpoint so that a marker landing on
            // a grid tick applies before any automation at that tick.
            let mut s = cur_tick;
            while s + MICRO_STEP_TICKS < tick {
                s += MICRO_STEP_TICKS;
                state.advance(units_per_step);
                if state.vibrato_cents > 0.0 {
                    emit_bend(&mut synth, &state, src, s, range_semitones);
                }
                if state.tremolo_depth > 0 {
                    synth.push(DecodedEvent::new(
                        src.0,
                        src.1,
                        s,
                        EventKind::Expression {
                            value: state.expression_value(),
                        },
                    ));
                }
            }
        }
        cur_tick = tick;

        match control {
            Control::Tempo(new_mpq) => mpq = new_mpq,
            Control::End => break,
            Control::Marker { kind, data, offset, len } => {
                src = (offset, len);
                match kind {
                    MarkerKind::Vibrato => {
                        let depth = VIBRATO_DEPTH_CENTS[(data[0] & 15) as usize];
                        state.vibrato_cents = f64::from(depth);
                        let needed = state.needed_range();
                        if needed > range_semitones {
                            range_semitones = needed;
                            synth.push(DecodedEvent::new(
                                offset,
                                len,
                                tick,
                                EventKind::PitchBendRange {
                                    semitones: range_semitones,
                                },
                            ));
                        }
                        // The new depth takes effect at the marker's own
                        // tick, not at the next grid point; depth zero
                        // recenters to the manual-only component.
                        emit_bend(&mut synth, &state, src, tick, range_semitones);
                    }
                    MarkerKind::Tremolo => {
                        state.tremolo_depth = TREMOLO_DEPTH[(data[0] & 15) as usize];
                        synth.push(DecodedEvent::new(
                            offset,
                            len,
                            tick,
                            EventKind::Expression {
                                value: state.expression_value(),
                            },
                        ));
                    }
                    MarkerKind::LfoRate => {
                        state.rate_index = (data[0] & 15) as usize;
                    }
                    MarkerKind::LfoReset => {
                        state.reset();
                        emit_bend(&mut synth, &state, src, tick, range_semitones);
                        if state.tremolo_depth > 0 {
                            synth.push(DecodedEvent::new(
                                offset,
                                len,
                                tick,
                                EventKind::Expression { value: 127 },
                            ));
                        }
                    }
                    MarkerKind::PitchBend => {
                        let cents = i16::from_be_bytes(data);
                        state.manual_cents = f64::from(cents);
                        emit_bend(&mut synth, &state, src, tick, range_semitones);
                    }
                    MarkerKind::Tie => {}
                }
            }
        }
    }

    track.events.append(&mut synth);
    track.events.sort_by_key(|e| e.priority);
    track.events.sort_by_key(|e| e.tick);
}
