//! CPS v1 sound-driver sequence handler
//!
//! The v1 driver packs pitch and duration into a single status byte:
//! the top three bits select a duration-table slot and the low five bits
//! a pitch within the current octave (zero meaning a rest). All remaining
//! state is modal and set through opcodes 0x00-0x1B: octave, duration
//! table and scale, tie mode, four nestable counted-loop slots, and the
//! LFO selectors that the post-pass later expands.
//!
//! Several encodings changed across driver revisions, keyed here on
//! `rev` (driver revision times 100):
//! - below 1.40 the tempo operand is a 16-bit scaled word, from 1.40 on
//!   a single bpm byte
//! - below 1.16 bank selection piggybacks on the program number's top
//!   bit, from 1.16 on a dedicated bank opcode exists

use log::warn;

use crate::byte_window::Endian;
use crate::event::{EventKind, MarkerKind};
use crate::track::{DecodeStep, SeqHandler, TrackContext};
use crate::Result;

/// Duration tables, indexed by the status byte's top three bits minus
/// one. Values are sixteenths of a tick unit before scaling.
const DUR_TABLE_A: [u16; 7] = [12, 9, 6, 4, 3, 2, 1];
const DUR_TABLE_B: [u16; 7] = [12, 8, 6, 4, 3, 2, 1];
const DUR_REDUCED: [u16; 7] = [9, 6, 4, 3, 2, 1, 1];

/// Base key per octave register value.
const OCTAVE_TABLE: [u8; 8] = [0, 12, 24, 36, 48, 60, 72, 84];

/// Default note velocity; the v1 driver has no per-note velocity.
const DEFAULT_VELOCITY: u8 = 100;

/// Pre-1.40 tempo words are bpm scaled by this.
const TEMPO_DIVISOR: f64 = 3.2768;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TieState {
    NotTied,
    TiedStart,
    TiedContinue,
}

#[derive(Debug, Clone, Copy, Default)]
struct LoopSlot {
    armed: bool,
    counter: u8,
    return_offset: u32,
}

/// Modal decode state for one CPS v1 track.
pub struct CpsV1Handler {
    rev: u16,
    dur_flags: u8,
    dur_scale: u16,
    octave: u8,
    tie: TieState,
    last_key: u8,
    bank: u8,
    transpose: i8,
    loops: [LoopSlot; 4],
}

impl CpsV1Handler {
    /// Handler for driver revision `rev` (revision times 100).
    pub fn new(rev: u16) -> Self {
        Self {
            rev,
            dur_flags: 0,
            dur_scale: 256,
            octave: 0,
            tie: TieState::NotTied,
            last_key: 0,
            bank: 0,
            transpose: 0,
            loops: [LoopSlot::default(); 4],
        }
    }

    fn dur_table(&self) -> &'static [u16; 7] {
        match self.dur_flags & 3 {
            0 => &DUR_TABLE_A,
            1 => &DUR_TABLE_B,
            _ => &DUR_REDUCED,
        }
    }

    /// Ticks for duration-table slot `idx` under the current scale.
    fn note_ticks(&self, idx: usize) -> u32 {
        let base = u32::from(self.dur_table()[idx]) << 4;
        base * u32::from(self.dur_scale) / 256
    }

    fn key_for(&self, low5: u8) -> u8 {
        let base = i16::from(low5) + i16::from(OCTAVE_TABLE[(self.octave & 7) as usize]) - 1;
        (base + i16::from(self.transpose)).clamp(0, 127) as u8
    }

    fn read_note(&mut self, ctx: &mut TrackContext, status: u8) -> DecodeStep {
        let idx = ((status >> 5) - 1) as usize;
        let dur = self.note_ticks(idx);
        let low5 = status & 0x1F;
        let off = ctx.cursor;

        if low5 == 0 {
            if self.tie == TieState::TiedContinue {
                // A rest inside a tie closes the held note.
                ctx.emit(off, 1, EventKind::NoteOff { key: self.last_key });
                self.tie = TieState::TiedStart;
            }
            ctx.emit(off, 1, EventKind::Rest { duration: dur });
            ctx.advance(dur);
            return DecodeStep::Continue(1);
        }

        let key = self.key_for(low5);
        match self.tie {
            TieState::NotTied => {
                ctx.emit(
                    off,
                    1,
                    EventKind::Note {
                        key,
                        velocity: DEFAULT_VELOCITY,
                        duration: dur,
                    },
                );
            }
            TieState::TiedStart => {
                ctx.emit(
                    off,
                    1,
                    EventKind::NoteOn {
                        key,
                        velocity: DEFAULT_VELOCITY,
                        portamento: false,
                    },
                );
                self.tie = TieState::TiedContinue;
            }
            TieState::TiedContinue => {
                if key == self.last_key {
                    ctx.emit(
                        off,
                        1,
                        EventKind::Marker {
                            kind: MarkerKind::Tie,
                            data: [0, 0],
                        },
                    );
                } else {
                    ctx.emit(off, 1, EventKind::NoteOff { key: self.last_key });
                    ctx.emit(
                        off,
                        1,
                        EventKind::NoteOn {
                            key,
                            velocity: DEFAULT_VELOCITY,
                            portamento: true,
                        },
                    );
                }
            }
        }
        self.last_key = key;
        ctx.advance(dur);
        DecodeStep::Continue(1)
    }

    /// Counted-loop start: `[op][count][dest:u16be]`.
    ///
    /// A re-encountered start whose destination differs from the armed
    /// slot's ends the track; the driver treats that as sequence
    /// corruption rather than re-arming.
    fn loop_start(&mut self, ctx: &mut TrackContext, slot_idx: usize) -> Result<DecodeStep> {
        let off = ctx.cursor;
        let count = ctx.window.get_u8(off + 1)?;
        let dest = u32::from(ctx.window.get_u16(off + 2, Endian::Big)?);
        if dest == 0 {
            ctx.emit(off, 4, EventKind::EndOfTrack);
            return Ok(DecodeStep::End);
        }
        let slot = &mut self.loops[slot_idx];
        if slot.armed {
            if slot.return_offset != dest {
                warn!(
                    "loop slot {} re-armed with different target {:#x} (was {:#x})",
                    slot_idx, dest, slot.return_offset
                );
                ctx.emit(off, 4, EventKind::EndOfTrack);
                return Ok(DecodeStep::End);
            }
            slot.counter -= 1;
            if slot.counter == 0 {
                slot.armed = false;
                return Ok(DecodeStep::Continue(4));
            }
            return Ok(DecodeStep::Jump(dest));
        }
        if count == 0 {
            ctx.emit(off, 4, EventKind::LoopForever);
            return Ok(DecodeStep::End);
        }
        slot.armed = true;
        slot.counter = count;
        slot.return_offset = dest;
        ctx.emit(off, 4, EventKind::LoopMarker);
        Ok(DecodeStep::Jump(dest))
    }

    /// Loop break: `[op][dest:u16be]`, taken only on the final pass.
    fn loop_break(&mut self, ctx: &mut TrackContext, slot_idx: usize) -> Result<DecodeStep> {
        let off = ctx.cursor;
        let dest = u32::from(ctx.window.get_u16(off + 1, Endian::Big)?);
        let slot = &mut self.loops[slot_idx];
        if slot.armed && slot.counter == 1 {
            if dest == 0 {
                ctx.emit(off, 3, EventKind::EndOfTrack);
                return Ok(DecodeStep::End);
            }
            slot.armed = false;
            ctx.emit(off, 3, EventKind::LoopMarker);
            return Ok(DecodeStep::Jump(dest));
        }
        Ok(DecodeStep::Continue(3))
    }

    fn read_event_inner(&mut self, ctx: &mut TrackContext) -> Result<DecodeStep> {
        let off = ctx.cursor;
        let status = ctx.window.get_u8(off)?;
        if status >= 0x20 {
            return Ok(self.read_note(ctx, status));
        }
        match status {
            0x00 => {
                ctx.emit(off, 1, EventKind::EndOfTrack);
                Ok(DecodeStep::End)
            }
            0x01 => {
                self.octave = ctx.window.get_u8(off + 1)? & 7;
                Ok(DecodeStep::Continue(2))
            }
            0x02 => {
                self.octave = (self.octave + 1).min(7);
                Ok(DecodeStep::Continue(1))
            }
            0x03 => {
                self.octave = self.octave.saturating_sub(1);
                Ok(DecodeStep::Continue(1))
            }
            0x04 => {
                match self.tie {
                    TieState::NotTied => self.tie = TieState::TiedStart,
                    TieState::TiedStart => self.tie = TieState::NotTied,
                    TieState::TiedContinue => {
                        ctx.emit(off, 1, EventKind::NoteOff { key: self.last_key });
                        self.tie = TieState::NotTied;
                    }
                }
                Ok(DecodeStep::Continue(1))
            }
            0x05 => {
                self.dur_flags = ctx.window.get_u8(off + 1)? & 3;
                Ok(DecodeStep::Continue(2))
            }
            0x06 => {
                let raw = ctx.window.get_u8(off + 1)?;
                self.dur_scale = if raw == 0 { 256 } else { u16::from(raw) };
                ctx.emit(off, 2, EventKind::DurationScale { raw });
                Ok(DecodeStep::Continue(2))
            }
            0x07 => {
                if self.rev < 140 {
                    let raw = ctx.window.get_u16(off + 1, Endian::Big)?;
                    let bpm = f64::from(raw) / TEMPO_DIVISOR;
                    ctx.emit(off, 3, EventKind::TempoBpm { bpm });
                    Ok(DecodeStep::Continue(3))
                } else {
                    let bpm = f64::from(ctx.window.get_u8(off + 1)?);
                    ctx.emit(off, 2, EventKind::TempoBpm { bpm });
                    Ok(DecodeStep::Continue(2))
                }
            }
            0x08 => {
                let nn = ctx.window.get_u8(off + 1)?;
                if self.rev < 116 {
                    let bank = if nn >= 0x80 { 1 } else { 0 };
                    if bank != self.bank {
                        self.bank = bank;
                        ctx.emit(off, 2, EventKind::BankSelect { bank });
                    }
                    ctx.emit(off, 2, EventKind::ProgramChange { program: nn & 0x7F });
                } else {
                    ctx.emit(off, 2, EventKind::ProgramChange { program: nn & 0x7F });
                }
                Ok(DecodeStep::Continue(2))
            }
            0x09 => {
                let nn = ctx.window.get_u8(off + 1)?;
                if self.rev >= 116 {
                    self.bank = nn.wrapping_mul(2);
                    ctx.emit(off, 2, EventKind::BankSelect { bank: self.bank });
                } else {
                    ctx.emit(off, 2, EventKind::Unknown { opcode: status });
                }
                Ok(DecodeStep::Continue(2))
            }
            0x0A => {
                let v = ctx.window.get_u8(off + 1)? & 0x7F;
                ctx.emit(off, 2, EventKind::Volume { value: v });
                Ok(DecodeStep::Continue(2))
            }
            0x0B => {
                let v = ctx.window.get_u8(off + 1)? & 0x7F;
                ctx.emit(off, 2, EventKind::Pan { value: v });
                Ok(DecodeStep::Continue(2))
            }
            0x0C => {
                let raw = ctx.window.get_u16(off + 1, Endian::Big)? & 0x3FFF;
                let value = portamento_time(raw);
                ctx.emit(off, 3, EventKind::PortamentoTime { value });
                Ok(DecodeStep::Continue(3))
            }
            0x0D => {
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
            0x0E => {
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
            0x0F => {
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
            0x10 => {
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
            0x11 => {
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
            0x12 => {
                let semis = ctx.window.get_i8(off + 1)?;
                self.transpose = semis;
                ctx.emit(off, 2, EventKind::Transpose { semitones: semis });
                Ok(DecodeStep::Continue(2))
            }
            0x13..=0x16 => self.loop_start(ctx, (status - 0x13) as usize),
            0x17..=0x1A => self.loop_break(ctx, (status - 0x17) as usize),
            0x1B => {
                let dest = u32::from(ctx.window.get_u16(off + 1, Endian::Big)?);
                if dest == 0 {
                    ctx.emit(off, 3, EventKind::EndOfTrack);
                } else {
                    ctx.emit(off, 3, EventKind::LoopForever);
                }
                Ok(DecodeStep::End)
            }
            _ => {
                warn!("cps-v1: unknown opcode {:#04x} at {:#x}", status, off);
                ctx.emit(off, 1, EventKind::Unknown { opcode: status });
                Ok(DecodeStep::Continue(1))
            }
        }
    }
}

/// Map a raw 14-bit inverse-rate word to the emitted portamento time.
/// The driver converts through decacents per second and back, which
/// cancels exactly; only the endpoints (fastest slide, no slide) pin
/// to zero.
fn portamento_time(raw: u16) -> u16 {
    if raw == 0 || raw >= 0x3FFF {
        return 0;
    }
    raw
}

impl SeqHandler for CpsV1Handler {
    fn reset_state(&mut self) {
        let rev = self.rev;
        *self = Self::new(rev);
    }

    fn read_event(&mut self, ctx: &mut TrackContext) -> DecodeStep {
        match self.read_event_inner(ctx) {
            Ok(step) => step,
            Err(e) => {
                warn!("cps-v1: decode failed at {:#x}: {}", ctx.cursor, e);
                DecodeStep::Fatal(e.to_string())
            }
        }
    }
}
