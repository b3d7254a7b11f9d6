//! Square-SNES sound-driver sequence handler
//!
//! Statuses 0x00-0xD1 combine a duration-table index with a pitch class:
//! `status / 14` picks one of fifteen duration slots (the last slot means
//! an explicit duration byte follows) and `status % 14` selects a pitch
//! class, a tie, or a rest. Repeats nest through a true eight-deep stack
//! rather than the CPS drivers' fixed slots.

use log::warn;

use crate::event::{EventKind, MarkerKind};
use crate::track::{DecodeStep, SeqHandler, TrackContext};
use crate::Result;

/// Ticks per duration-table slot; index 14 signals an explicit byte.
const DUR_TABLE: [u8; 15] = [
    0xC0, 0x90, 0x60, 0x48, 0x30, 0x24, 0x18, 0x10, 0x0C, 0x08, 0x06, 0x04, 0x03, 0x02, 0,
];

const DEFAULT_VELOCITY: u8 = 100;
const REPEAT_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct RepeatFrame {
    counter: u8,
    return_offset: u32,
}

/// Modal decode state for one Square-SNES track.
pub struct SquareSnesHandler {
    octave: u8,
    transpose: i8,
    repeats: [RepeatFrame; REPEAT_DEPTH],
    depth: usize,
    last_key: u8,
}

impl SquareSnesHandler {
    /// Handler with the driver's power-on defaults (octave 4).
    pub fn new() -> Self {
        Self {
            octave: 4,
            transpose: 0,
            repeats: [RepeatFrame::default(); REPEAT_DEPTH],
            depth: 0,
            last_key: 0,
        }
    }

    fn read_note(&mut self, ctx: &mut TrackContext, status: u8) -> Result<DecodeStep> {
        let off = ctx.cursor;
        let dur_idx = (status / 14) as usize;
        let pc = status % 14;
        let (dur, len) = if dur_idx == 14 {
            (u32::from(ctx.window.get_u8(off + 1)?), 2)
        } else {
            (u32::from(DUR_TABLE[dur_idx]), 1)
        };

        match pc {
            12 => {
                ctx.emit(off, len, EventKind::Rest { duration: dur });
            }
            13 => {
                ctx.emit(
                    off,
                    len,
                    EventKind::Marker {
                        kind: MarkerKind::Tie,
                        data: [0, 0],
                    },
                );
            }
            _ => {
                let base = i16::from(self.octave + 1) * 12 + i16::from(pc);
                let key = (base + i16::from(self.transpose)).clamp(0, 127) as u8;
                self.last_key = key;
                ctx.emit(
                    off,
                    len,
                    EventKind::Note {
                        key,
                        velocity: DEFAULT_VELOCITY,
                        duration: dur,
                    },
                );
            }
        }
        ctx.advance(dur);
        Ok(DecodeStep::Continue(len))
    }

    fn read_event_inner(&mut self, ctx: &mut TrackContext) -> Result<DecodeStep> {
        let off = ctx.cursor;
        let status = ctx.window.get_u8(off)?;
        if status <= 0xD1 {
            return self.read_note(ctx, status);
        }
        match status {
            0xD2 => {
                let v = ctx.window.get_u8(off + 1)? & 0x7F;
                ctx.emit(off, 2, EventKind::Volume { value: v });
                Ok(DecodeStep::Continue(2))
            }
            0xD3 => {
                let v = ctx.window.get_u8(off + 1)? & 0x7F;
                ctx.emit(off, 2, EventKind::Pan { value: v });
                Ok(DecodeStep::Continue(2))
            }
            0xD4 => {
                let bpm = f64::from(ctx.window.get_u8(off + 1)?);
                ctx.emit(off, 2, EventKind::TempoBpm { bpm });
                Ok(DecodeStep::Continue(2))
            }
            0xD5 => {
                self.octave = ctx.window.get_u8(off + 1)? & 7;
                Ok(DecodeStep::Continue(2))
            }
            0xD6 => {
                self.octave = (self.octave + 1).min(7);
                Ok(DecodeStep::Continue(1))
            }
            0xD7 => {
                self.octave = self.octave.saturating_sub(1);
                Ok(DecodeStep::Continue(1))
            }
            0xD8 => {
                let nn = ctx.window.get_u8(off + 1)?;
                ctx.emit(off, 2, EventKind::ProgramChange { program: nn & 0x7F });
                Ok(DecodeStep::Continue(2))
            }
            0xD9 => {
                let semis = ctx.window.get_i8(off + 1)?;
                self.transpose = semis;
                ctx.emit(off, 2, EventKind::Transpose { semitones: semis });
                Ok(DecodeStep::Continue(2))
            }
            0xDA => {
                let nn = ctx.window.get_u8(off + 1)?;
                ctx.emit(
                    off,
                    2,
                    EventKind::Marker {
                        kind: MarkerKind::Vibrato,
                        data: [nn, 0],
                    },
                );
                Ok(DecodeStep::Continue(2))
            }
            0xDB => {
                let nn = ctx.window.get_u8(off + 1)?;
                ctx.emit(
                    off,
                    2,
                    EventKind::Marker {
                        kind: MarkerKind::Tremolo,
                        data: [nn, 0],
                    },
                );
                Ok(DecodeStep::Continue(2))
            }
            0xDC => {
                let nn = ctx.window.get_u8(off + 1)?;
                ctx.emit(
                    off,
                    2,
                    EventKind::Marker {
                        kind: MarkerKind::LfoRate,
                        data: [nn, 0],
                    },
                );
                Ok(DecodeStep::Continue(2))
            }
            0xDD => {
                ctx.emit(
                    off,
                    1,
                    EventKind::Marker {
                        kind: MarkerKind::LfoReset,
                        data: [0, 0],
                    },
                );
                Ok(DecodeStep::Continue(1))
            }
            0xDE => {
                let count = ctx.window.get_u8(off + 1)?;
                if self.depth == REPEAT_DEPTH {
                    warn!("square-snes: repeat stack full at {:#x}", off);
                    return Ok(DecodeStep::Continue(2));
                }
                self.repeats[self.depth] = RepeatFrame {
                    counter: count.max(1),
                    return_offset: off + 2,
                };
                self.depth += 1;
                ctx.emit(off, 2, EventKind::LoopMarker);
                Ok(DecodeStep::Continue(2))
            }
            0xDF => {
                if self.depth == 0 {
                    return Ok(DecodeStep::Continue(1));
                }
                let top = &mut self.repeats[self.depth - 1];
                if top.counter <= 1 {
                    self.depth -= 1;
                    return Ok(DecodeStep::Continue(1));
                }
                top.counter -= 1;
                Ok(DecodeStep::Jump(top.return_offset))
            }
            0xE0 => {
                let hh = ctx.window.get_u8(off + 1)?;
                let ll = ctx.window.get_u8(off + 2)?;
                ctx.emit(
                    off,
                    3,
                    EventKind::Marker {
                        kind: MarkerKind::PitchBend,
                        data: [hh, ll],
                    },
                );
                Ok(DecodeStep::Continue(3))
            }
            0xE1 => {
                ctx.emit(off, 1, EventKind::EndOfTrack);
                Ok(DecodeStep::End)
            }
            _ => {
                warn!("square-snes: unknown opcode {:#04x} at {:#x}", status, off);
                ctx.emit(off, 1, EventKind::Unknown { opcode: status });
                Ok(DecodeStep::Continue(1))
            }
        }
    }
}

impl Default for SquareSnesHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SeqHandler for SquareSnesHandler {
    fn reset_state(&mut self) {
        *self = Self::new();
    }

    fn read_event(&mut self, ctx: &mut TrackContext) -> DecodeStep {
        match self.read_event_inner(ctx) {
            Ok(step) => step,
            Err(e) => {
                warn!("square-snes: decode failed at {:#x}: {}", ctx.cursor, e);
                DecodeStep::Fatal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_window::ByteWindow;
    use crate::track::{TrackDecoder, TrackState};

    fn decode(bytes: &[u8]) -> crate::track::DecodedTrack {
        let window = ByteWindow::from_slice(bytes, 0);
        let mut handler = SquareSnesHandler::new();
        TrackDecoder::new(0, 0, bytes.len() as u32).decode(&mut handler, &window)
    }

    #[test]
    fn test_packed_status_note() {
        // status 0x00: slot 0 (0xC0 ticks), pitch class 0, octave 4
        let track = decode(&[0x00, 0xE1]);
        match &track.events[0].kind {
            EventKind::Note { key, duration, .. } => {
                assert_eq!(*key, 60);
                assert_eq!(*duration, 0xC0);
            }
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_duration_slot_reads_extra_byte() {
        // slot 14 starts at status 14 * 14 = 196 (0xC4); pitch class 0
        let track = decode(&[0xC4, 0x55, 0xE1]);
        match &track.events[0].kind {
            EventKind::Note { duration, .. } => assert_eq!(*duration, 0x55),
            other => panic!("expected note, got {:?}", other),
        }
        assert_eq!(track.events[0].len, 2);
    }

    #[test]
    fn test_rest_and_tie_pitch_classes() {
        // pitch class 12 = rest, 13 = tie (slot 0)
        let track = decode(&[12, 13, 0xE1]);
        assert!(matches!(track.events[0].kind, EventKind::Rest { .. }));
        assert!(matches!(
            track.events[1].kind,
            EventKind::Marker {
                kind: MarkerKind::Tie,
                ..
            }
        ));
        // both advance a full slot-0 duration
        assert_eq!(track.total_ticks, 2 * 0xC0);
    }

    #[test]
    fn test_octave_shift_changes_key() {
        let track = decode(&[0xD5, 0x02, 0x00, 0xE1]);
        match &track.events[0].kind {
            EventKind::Note { key, .. } => assert_eq!(*key, 36),
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn test_repeat_block_runs_count_times() {
        let bytes = [
            0xDE, 0x03, // repeat x3
            0x70, // note: slot 8 (0x0C ticks), pitch class 0
            0xDF, // end repeat
            0xE1,
        ];
        let track = decode(&bytes);
        assert_eq!(track.state, TrackState::Ended);
        let notes = track
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count();
        assert_eq!(notes, 3);
        assert_eq!(track.total_ticks, 3 * 0x0C);
    }

    #[test]
    fn test_nested_repeats() {
        let bytes = [
            0xDE, 0x02, // outer x2
            0xDE, 0x02, // inner x2
            0x70, // note
            0xDF, // close inner
            0xDF, // close outer
            0xE1,
        ];
        let track = decode(&bytes);
        assert_eq!(track.state, TrackState::Ended);
        let notes = track
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count();
        assert_eq!(notes, 4);
    }

    #[test]
    fn test_unmatched_repeat_end_is_skipped() {
        let track = decode(&[0xDF, 0x70, 0xE1]);
        assert_eq!(track.state, TrackState::Ended);
        let notes = track
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count();
        assert_eq!(notes, 1);
    }
}
