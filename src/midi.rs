//! MIDI-ready message stream
//!
//! Flattens a [`DecodedSequence`](crate::sequence::DecodedSequence) into
//! per-track lists of tick-stamped channel messages. Durations become
//! explicit note-off messages, controller numbers follow the General
//! MIDI assignments, and pitch-bend range changes go out as RPN 0
//! writes.

use crate::event::EventKind;
use crate::sequence::DecodedSequence;
use crate::Result;

/// General MIDI controller numbers used by the converter.
pub mod cc {
    /// Bank select (MSB)
    pub const BANK_SELECT: u8 = 0;
    /// Portamento time (MSB)
    pub const PORTAMENTO_TIME: u8 = 5;
    /// Channel volume
    pub const VOLUME: u8 = 7;
    /// Pan
    pub const PAN: u8 = 10;
    /// Expression
    pub const EXPRESSION: u8 = 11;
    /// Portamento time (LSB)
    pub const PORTAMENTO_TIME_LSB: u8 = 37;
    /// Portamento on/off
    pub const PORTAMENTO: u8 = 65;
    /// RPN fine
    pub const RPN_LSB: u8 = 100;
    /// RPN coarse
    pub const RPN_MSB: u8 = 101;
    /// Data entry (MSB)
    pub const DATA_ENTRY: u8 = 6;
    /// Data entry (LSB)
    pub const DATA_ENTRY_LSB: u8 = 38;
}

/// One channel-level MIDI message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiMessage {
    /// Key down
    NoteOn {
        /// Channel 0-15
        channel: u8,
        /// Key number
        key: u8,
        /// Velocity
        velocity: u8,
    },
    /// Key up
    NoteOff {
        /// Channel 0-15
        channel: u8,
        /// Key number
        key: u8,
    },
    /// Controller write
    ControlChange {
        /// Channel 0-15
        channel: u8,
        /// Controller number
        controller: u8,
        /// Controller value
        value: u8,
    },
    /// Program change
    ProgramChange {
        /// Channel 0-15
        channel: u8,
        /// Program number
        program: u8,
    },
    /// 14-bit pitch bend
    PitchBend {
        /// Channel 0-15
        channel: u8,
        /// Bend value 0-16383
        value: u16,
    },
    /// Tempo meta message in microseconds per quarter note
    TempoMicros(u32),
    /// End-of-track meta message
    EndOfTrack,
}

/// A message with its absolute tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedMessage {
    /// Absolute tick
    pub tick: u64,
    /// The message
    pub message: MidiMessage,
}

/// Sink for converted tracks (SMF writers, live players, dumpers).
pub trait MidiEmitter {
    /// Receive one converted track.
    fn emit_track(&mut self, index: usize, messages: &[TimedMessage]) -> Result<()>;
}

/// Convert every track of a decoded sequence into tick-stamped MIDI
/// messages. Track `i` maps to channel `i % 16`. Tempo meta messages
/// ride on the first decoded track, the same one the tempo map was
/// built from.
pub fn sequence_to_midi(seq: &DecodedSequence) -> Vec<Vec<TimedMessage>> {
    seq.tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
            let channel = (track.index % 16) as u8;
            convert_track(track, channel, &seq.tempo_map, i == 0)
        })
        .collect()
}

fn push(out: &mut Vec<TimedMessage>, tick: u64, message: MidiMessage) {
    out.push(TimedMessage { tick, message });
}

fn convert_track(
    track: &crate::track::DecodedTrack,
    channel: u8,
    tempo_map: &crate::timing::TempoMap,
    carries_tempo: bool,
) -> Vec<TimedMessage> {
    let mut out = Vec::with_capacity(track.events.len() * 2);
    let mut portamento_on = false;
    let mut ended = false;

    if carries_tempo {
        for entry in tempo_map.entries() {
            push(
                &mut out,
                entry.tick,
                MidiMessage::TempoMicros(entry.micros_per_quarter),
            );
        }
    }

    for ev in &track.events {
        let t = ev.tick;
        match &ev.kind {
            EventKind::Note {
                key,
                velocity,
                duration,
            } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::NoteOn {
                        channel,
                        key: *key,
                        velocity: *velocity,
                    },
                );
                push(
                    &mut out,
                    t + u64::from(*duration),
                    MidiMessage::NoteOff {
                        channel,
                        key: *key,
                    },
                );
            }
            EventKind::NoteOn {
                key,
                velocity,
                portamento,
            } => {
                if *portamento != portamento_on {
                    portamento_on = *portamento;
                    push(
                        &mut out,
                        t,
                        MidiMessage::ControlChange {
                            channel,
                            controller: cc::PORTAMENTO,
                            value: if portamento_on { 127 } else { 0 },
                        },
                    );
                }
                push(
                    &mut out,
                    t,
                    MidiMessage::NoteOn {
                        channel,
                        key: *key,
                        velocity: *velocity,
                    },
                );
            }
            EventKind::NoteOff { key } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::NoteOff {
                        channel,
                        key: *key,
                    },
                );
            }
            EventKind::ProgramChange { program } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::ProgramChange {
                        channel,
                        program: *program,
                    },
                );
            }
            EventKind::BankSelect { bank } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::ControlChange {
                        channel,
                        controller: cc::BANK_SELECT,
                        value: bank & 0x7F,
                    },
                );
            }
            EventKind::Volume { value } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::ControlChange {
                        channel,
                        controller: cc::VOLUME,
                        value: *value,
                    },
                );
            }
            EventKind::Pan { value } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::ControlChange {
                        channel,
                        controller: cc::PAN,
                        value: *value,
                    },
                );
            }
            EventKind::Expression { value } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::ControlChange {
                        channel,
                        controller: cc::EXPRESSION,
                        value: *value,
                    },
                );
            }
            EventKind::PitchBend { value } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::PitchBend {
                        channel,
                        value: *value,
                    },
                );
            }
            EventKind::PitchBendRange { semitones } => {
                for (controller, value) in [
                    (cc::RPN_MSB, 0),
                    (cc::RPN_LSB, 0),
                    (cc::DATA_ENTRY, *semitones),
                    (cc::DATA_ENTRY_LSB, 0),
                ] {
                    push(
                        &mut out,
                        t,
                        MidiMessage::ControlChange {
                            channel,
                            controller,
                            value,
                        },
                    );
                }
            }
            EventKind::PortamentoTime { value } => {
                push(
                    &mut out,
                    t,
                    MidiMessage::ControlChange {
                        channel,
                        controller: cc::PORTAMENTO_TIME,
                        value: (value >> 7) as u8 & 0x7F,
                    },
                );
                push(
                    &mut out,
                    t,
                    MidiMessage::ControlChange {
                        channel,
                        controller: cc::PORTAMENTO_TIME_LSB,
                        value: (value & 0x7F) as u8,
                    },
                );
            }
            EventKind::EndOfTrack | EventKind::LoopForever => {
                push(&mut out, t, MidiMessage::EndOfTrack);
                ended = true;
            }
            // Markers were resolved by the decoder or the post-pass;
            // modal events carry no channel message.
            EventKind::Marker { .. }
            | EventKind::Rest { .. }
            | EventKind::Tempo { .. }
            | EventKind::TempoBpm { .. }
            | EventKind::DurationScale { .. }
            | EventKind::Transpose { .. }
            | EventKind::LoopMarker
            | EventKind::Unknown { .. } => {}
        }
    }

    out.sort_by_key(|m| m.tick);
    if !ended {
        push(&mut out, track.total_ticks, MidiMessage::EndOfTrack);
    }
    out
}
