//! CPS v2 sound-driver sequence handler
//!
//! Unlike v1, the v2 driver carries velocity in the note status byte and
//! encodes every duration as a MIDI-style variable-length quantity. Loop
//! constructs split into four counted slots armed by 0xD0-0xD3 and closed
//! by 0xD4-0xD7, plus a relative jump opcode whose backward form means
//! "loop forever".

use log::warn;

use crate::byte_window::Endian;
use crate::event::{EventKind, MarkerKind};
use crate::formats::CpsV2Family;
use crate::track::{DecodeStep, SeqHandler, TrackContext};
use crate::Result;

#[derive(Debug, Clone, Copy, Default)]
struct LoopSlot {
    armed: bool,
    counter: u8,
    return_offset: u32,
}

/// Modal decode state for one CPS v2 track.
pub struct CpsV2Handler {
    family: CpsV2Family,
    transpose: i8,
    loops: [LoopSlot; 4],
}

impl CpsV2Handler {
    /// Handler for the given hardware family.
    pub fn new(family: CpsV2Family) -> Self {
        Self {
            family,
            transpose: 0,
            loops: [LoopSlot::default(); 4],
        }
    }

    /// Variable-length quantity starting at `offset`: seven value bits
    /// per byte, the high bit set on all but the last byte. Returns the
    /// value and the number of bytes consumed.
    fn read_var_len(ctx: &TrackContext, offset: u32) -> Result<(u32, u32)> {
        let mut value = 0u32;
        let mut consumed = 0u32;
        loop {
            let b = ctx.window.get_u8(offset + consumed)?;
            consumed += 1;
            value = (value << 7) | u32::from(b & 0x7F);
            if b & 0x80 == 0 || consumed == 4 {
                return Ok((value, consumed));
            }
        }
    }

    fn read_event_inner(&mut self, ctx: &mut TrackContext) -> Result<DecodeStep> {
        let off = ctx.cursor;
        let status = ctx.window.get_u8(off)?;

        // Rests encode their duration in the status byte itself as a
        // variable-length quantity starting at the status position.
        if status < 0x80 {
            let (dur, n) = Self::read_var_len(ctx, off)?;
            ctx.emit(off, n, EventKind::Rest { duration: dur });
            ctx.advance(dur);
            return Ok(DecodeStep::Continue(n));
        }

        if status < 0xC0 {
            let velocity = (status & 0x3F) << 1;
            let pitch = ctx.window.get_u8(off + 1)?;
            let key = (i16::from(pitch) + i16::from(self.transpose)).clamp(0, 127) as u8;
            let (dur, n) = Self::read_var_len(ctx, off + 2)?;
            ctx.emit(
                off,
                2 + n,
                EventKind::Note {
                    key,
                    velocity,
                    duration: dur,
                },
            );
            ctx.advance(dur);
            return Ok(DecodeStep::Continue(2 + n));
        }

        match status {
            0xC0 => {
                let nn = ctx.window.get_u8(off + 1)?;
                ctx.emit(off, 2, EventKind::ProgramChange { program: nn & 0x7F });
                Ok(DecodeStep::Continue(2))
            }
            0xC1 => {
                let nn = ctx.window.get_u8(off + 1)?;
                ctx.emit(off, 2, EventKind::BankSelect { bank: nn });
                Ok(DecodeStep::Continue(2))
            }
            0xC2 => {
                let v = ctx.window.get_u8(off + 1)? & 0x7F;
                ctx.emit(off, 2, EventKind::Volume { value: v });
                Ok(DecodeStep::Continue(2))
            }
            0xC3 => {
                let v = ctx.window.get_u8(off + 1)? & 0x7F;
                ctx.emit(off, 2, EventKind::Pan { value: v });
                Ok(DecodeStep::Continue(2))
            }
            0xC4 => {
                let v = ctx.window.get_u8(off + 1)? & 0x7F;
                ctx.emit(off, 2, EventKind::Expression { value: v });
                Ok(DecodeStep::Continue(2))
            }
            0xC5 => {
                let raw = ctx.window.get_u16(off + 1, Endian::Little)?;
                let bpm = f64::from(raw) / self.family.tempo_divisor();
                ctx.emit(off, 3, EventKind::TempoBpm { bpm });
                Ok(DecodeStep::Continue(3))
            }
            0xC6 => {
                let semis = ctx.window.get_i8(off + 1)?;
                self.transpose = semis;
                ctx.emit(off, 2, EventKind::Transpose { semitones: semis });
                Ok(DecodeStep::Continue(2))
            }
            0xC7 => {
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
            0xC8 => {
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
            0xC9 => {
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
            0xCA => {
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
            0xCB => {
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
            0xCC => {
                let raw = ctx.window.get_u16(off + 1, Endian::Big)? & 0x3FFF;
                ctx.emit(off, 3, EventKind::PortamentoTime { value: raw });
                Ok(DecodeStep::Continue(3))
            }
            0xD0..=0xD3 => {
                let slot = &mut self.loops[(status - 0xD0) as usize];
                let count = ctx.window.get_u8(off + 1)?;
                slot.armed = true;
                slot.counter = count.max(1);
                slot.return_offset = off + 2;
                ctx.emit(off, 2, EventKind::LoopMarker);
                Ok(DecodeStep::Continue(2))
            }
            0xD4..=0xD7 => {
                let slot = &mut self.loops[(status - 0xD4) as usize];
                if !slot.armed {
                    return Ok(DecodeStep::Continue(1));
                }
                if slot.counter == 0 {
                    // arming always stores a nonzero count
                    slot.armed = false;
                    return Ok(DecodeStep::Continue(1));
                }
                slot.counter -= 1;
                if slot.counter == 0 {
                    slot.armed = false;
                    return Ok(DecodeStep::Continue(1));
                }
                Ok(DecodeStep::Jump(slot.return_offset))
            }
            0xD8 => {
                let rel = ctx.window.get_i16(off + 1, Endian::Little)?;
                let target = (i64::from(off) + 3 + i64::from(rel)) as u32;
                if target == 0 {
                    ctx.emit(off, 3, EventKind::EndOfTrack);
                    return Ok(DecodeStep::End);
                }
                if rel > 0 {
                    ctx.emit(off, 3, EventKind::LoopMarker);
                    return Ok(DecodeStep::Jump(target));
                }
                // Non-positive displacement loops the track in place.
                ctx.emit(off, 3, EventKind::LoopForever);
                Ok(DecodeStep::End)
            }
            0xFF => {
                ctx.emit(off, 1, EventKind::EndOfTrack);
                Ok(DecodeStep::End)
            }
            _ => {
                warn!("cps-v2: unknown opcode {:#04x} at {:#x}", status, off);
                ctx.emit(off, 1, EventKind::Unknown { opcode: status });
                Ok(DecodeStep::Continue(1))
            }
        }
    }
}

impl SeqHandler for CpsV2Handler {
    fn reset_state(&mut self) {
        let family = self.family;
        *self = Self::new(family);
    }

    fn read_event(&mut self, ctx: &mut TrackContext) -> DecodeStep {
        match self.read_event_inner(ctx) {
            Ok(step) => step,
            Err(e) => {
                warn!("cps-v2: decode failed at {:#x}: {}", ctx.cursor, e);
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
        let mut handler = CpsV2Handler::new(CpsV2Family::Classic);
        TrackDecoder::new(0, 0, bytes.len() as u32).decode(&mut handler, &window)
    }

    #[test]
    fn test_note_carries_velocity_and_var_len_duration() {
        // status 0xA0: velocity (0x20 << 1) = 64; pitch 60; duration
        // var-len 0x81 0x00 = 128
        let track = decode(&[0xA0, 60, 0x81, 0x00, 0xFF]);
        match &track.events[0].kind {
            EventKind::Note {
                key,
                velocity,
                duration,
            } => {
                assert_eq!(*key, 60);
                assert_eq!(*velocity, 64);
                assert_eq!(*duration, 128);
            }
            other => panic!("expected note, got {:?}", other),
        }
        assert_eq!(track.total_ticks, 128);
    }

    #[test]
    fn test_rest_duration_is_the_status_byte() {
        let track = decode(&[0x30, 0xFF]);
        match &track.events[0].kind {
            EventKind::Rest { duration } => assert_eq!(*duration, 0x30),
            other => panic!("expected rest, got {:?}", other),
        }
    }

    #[test]
    fn test_end_opcode_emits_exactly_one_end_of_track() {
        let track = decode(&[0xFF, 0xFF, 0xFF]);
        assert_eq!(track.state, TrackState::Ended);
        let ends = track
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::EndOfTrack))
            .count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_counted_loop_repeats_body() {
        // arm slot 0 with count 3, body is one note, close slot 0
        let bytes = [
            0xD0, 0x03, // loop start
            0xA0, 60, 0x10, // note, duration 16
            0xD4, // loop end
            0xFF,
        ];
        let track = decode(&bytes);
        assert_eq!(track.state, TrackState::Ended);
        let notes = track
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count();
        assert_eq!(notes, 3);
        assert_eq!(track.total_ticks, 48);
    }

    #[test]
    fn test_unmatched_loop_end_is_skipped() {
        let track = decode(&[0xD4, 0xA0, 60, 0x10, 0xFF]);
        assert_eq!(track.state, TrackState::Ended);
        let notes = track
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count();
        assert_eq!(notes, 1);
    }

    #[test]
    fn test_zero_count_loop_plays_once() {
        let bytes = [0xD0, 0x00, 0xA0, 60, 0x10, 0xD4, 0xFF];
        let track = decode(&bytes);
        let notes = track
            .events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count();
        assert_eq!(notes, 1);
    }

    #[test]
    fn test_backward_jump_loops_forever() {
        // note then jump back over it
        let bytes = [0xA0, 60, 0x10, 0xD8, 0xFB, 0xFF, 0xFF];
        let track = decode(&bytes);
        assert_eq!(track.state, TrackState::Ended);
        assert!(track
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::LoopForever)));
    }

    #[test]
    fn test_zero_displacement_jump_loops_forever() {
        let track = decode(&[0xA0, 60, 0x10, 0xD8, 0x00, 0x00, 0xFF]);
        assert_eq!(track.state, TrackState::Ended);
        assert!(track
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::LoopForever)));
        assert!(!track
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::EndOfTrack)));
    }

    #[test]
    fn test_forward_jump_skips_bytes() {
        // jump over one note to the end marker
        let bytes = [0xD8, 0x03, 0x00, 0xA0, 60, 0x10, 0xFF];
        let track = decode(&bytes);
        assert_eq!(track.state, TrackState::Ended);
        assert!(!track
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::Note { .. })));
    }

    #[test]
    fn test_family_tempo_scaling() {
        let bytes = [0xC5, 0x00, 0x02, 0xFF]; // raw 0x0200 LE
        let window = ByteWindow::from_slice(&bytes, 0);
        for (family, divisor) in [
            (CpsV2Family::Classic, 3.2768),
            (CpsV2Family::Cps3, 3.4),
        ] {
            let mut handler = CpsV2Handler::new(family);
            let track =
                TrackDecoder::new(0, 0, bytes.len() as u32).decode(&mut handler, &window);
            match &track.events[0].kind {
                EventKind::TempoBpm { bpm } => {
                    assert!((bpm - 512.0 / divisor).abs() < 1e-9);
                }
                other => panic!("expected tempo, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_transpose_shifts_following_notes() {
        let bytes = [0xC6, 0x0C, 0xA0, 60, 0x10, 0xFF];
        let track = decode(&bytes);
        let key = track
            .events
            .iter()
            .find_map(|e| match &e.kind {
                EventKind::Note { key, .. } => Some(*key),
                _ => None,
            })
            .unwrap();
        assert_eq!(key, 72);
    }

    #[test]
    fn test_truncated_note_ends_with_error() {
        // note status byte with no pitch/duration bytes following
        let track = decode(&[0xA0]);
        assert_eq!(track.state, TrackState::EndedWithError);
    }
}
