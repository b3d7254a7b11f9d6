//! Format-agnostic decoded event model
//!
//! Every format handler emits [`DecodedEvent`]s: the source span the event
//! was decoded from, the absolute tick it occurs at, a priority used to
//! break same-tick ties in the post-pass, and a closed set of payloads.

use serde::Serialize;

/// Sort key used to break same-tick ties.
///
/// The post-pass stable-sorts by priority first and by absolute tick
/// second, so that within one tick lower priorities come first. A
/// vibrato-depth marker must be applied before a pitch bend at the same
/// tick, since it changes the bend range the bend is expressed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EventPriority {
    /// Tempo changes apply before everything else on the same tick
    Tempo,
    /// LFO/vibrato/tremolo state markers
    Marker,
    /// Pitch bends and expression automation
    Bend,
    /// Notes, rests and all remaining events
    Default,
}

/// What a pre-post-pass marker carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkerKind {
    /// Vibrato depth selector
    Vibrato,
    /// Tremolo depth selector
    Tremolo,
    /// LFO rate selector
    LfoRate,
    /// LFO phase/envelope reset
    LfoReset,
    /// Manual pitch bend in cents (i16, big-endian in `data`)
    PitchBend,
    /// Tie continuation of the previous note
    Tie,
}

/// Closed set of event payloads emitted by all decoders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventKind {
    /// Note with an explicit duration in ticks
    Note {
        /// MIDI key number
        key: u8,
        /// MIDI velocity
        velocity: u8,
        /// Length in ticks
        duration: u32,
    },
    /// Note-on without a known end (tied notes)
    NoteOn {
        /// MIDI key number
        key: u8,
        /// MIDI velocity
        velocity: u8,
        /// Whether the note glides from the previous tied pitch
        portamento: bool,
    },
    /// Note-off for a previously started note
    NoteOff {
        /// MIDI key number
        key: u8,
    },
    /// Silence for a duration in ticks
    Rest {
        /// Length in ticks
        duration: u32,
    },
    /// Tempo in microseconds per quarter note
    Tempo {
        /// Microseconds per quarter note
        micros_per_quarter: u32,
    },
    /// Tempo in beats per minute (as carried by the driver)
    TempoBpm {
        /// Beats per minute
        bpm: f64,
    },
    /// Program (instrument) change
    ProgramChange {
        /// Program number 0-127
        program: u8,
    },
    /// Bank select
    BankSelect {
        /// Bank number
        bank: u8,
    },
    /// Channel volume 0-127
    Volume {
        /// Controller value
        value: u8,
    },
    /// Pan position 0-127 (64 = center)
    Pan {
        /// Controller value
        value: u8,
    },
    /// Expression 0-127
    Expression {
        /// Controller value
        value: u8,
    },
    /// 14-bit pitch bend, centered at 8192
    PitchBend {
        /// Bend value 0-16383
        value: u16,
    },
    /// Pitch-bend range in whole semitones
    PitchBendRange {
        /// Range in semitones
        semitones: u8,
    },
    /// 14-bit portamento time
    PortamentoTime {
        /// Time value 0-16383
        value: u16,
    },
    /// Modal note-duration scale change (raw driver byte)
    DurationScale {
        /// Raw scale operand; 0 selects the full scale of 256
        raw: u8,
    },
    /// LFO/vibrato/tremolo/manual-bend state carrier, resolved by the
    /// post-pass
    Marker {
        /// What the marker carries
        kind: MarkerKind,
        /// Raw operand bytes
        data: [u8; 2],
    },
    /// Transpose accumulator change in semitones
    Transpose {
        /// Signed semitone offset
        semitones: i8,
    },
    /// A loop construct was armed, repeated or exited
    LoopMarker,
    /// The track loops forever from here; decoding stops
    LoopForever,
    /// Normal end of track
    EndOfTrack,
    /// Unrecognized opcode, spanning its minimal consumed width
    Unknown {
        /// The raw status byte
        opcode: u8,
    },
}

impl EventKind {
    /// Priority this payload sorts with in the post-pass.
    pub fn priority(&self) -> EventPriority {
        match self {
            EventKind::Tempo { .. } | EventKind::TempoBpm { .. } => EventPriority::Tempo,
            EventKind::Marker { .. } | EventKind::PitchBendRange { .. } => EventPriority::Marker,
            EventKind::PitchBend { .. } | EventKind::Expression { .. } => EventPriority::Bend,
            _ => EventPriority::Default,
        }
    }
}

/// One decoded event.
///
/// `offset` and `len` always lie within the owning track's declared byte
/// range; post-pass-synthesized events reuse the source span of the marker
/// that caused them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent {
    /// Virtual offset the event was decoded from
    pub offset: u32,
    /// Number of source bytes the event spans
    pub len: u32,
    /// Absolute tick the event occurs at
    pub tick: u64,
    /// Same-tick tie breaker
    pub priority: EventPriority,
    /// Payload
    pub kind: EventKind,
}

impl DecodedEvent {
    /// Create an event with the payload's default priority.
    pub fn new(offset: u32, len: u32, tick: u64, kind: EventKind) -> Self {
        let priority = kind.priority();
        Self {
            offset,
            len,
            tick,
            priority,
            kind,
        }
    }
}
