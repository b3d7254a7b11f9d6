//! Sound-driver sequence decoder for retro-game music extraction
//!
//! Converts proprietary, per-game sound-driver "sequence" byte-code
//! (extracted from arcade/console ROM images) into a portable,
//! time-stamped musical event stream, and from there into a standard
//! MIDI-ready message stream.
//!
//! # Features
//! - Bounds-checked, virtual-offset byte windows over ROM-extracted data
//! - Generic per-track decode loop shared by all format handlers
//! - CPS-family v1/v2 opcode interpreters (revision-dependent encodings)
//! - Square-SNES opcode interpreter (stack-based repeats)
//! - Tempo-map construction and LFO (vibrato/tremolo) reconstruction as
//!   explicit MIDI pitch-bend/expression automation
//! - MIDI-ready event stream with 14-bit pitch bends and RPN bend range
//!
//! # Crate feature flags
//! - `cps` (default): CPS-family v1/v2 sequence decoders
//! - `square-snes` (default): Square-SNES sequence decoder
//!
//! # Quick start
//! ```no_run
//! use seqmidi::{ByteWindow, FormatKind, SequenceDecoder};
//!
//! let data = std::fs::read("seq.bin").unwrap();
//! let window = ByteWindow::load(data, 0);
//! let decoder = SequenceDecoder::new(FormatKind::CpsV1 { rev: 140 }, 0);
//! let seq = decoder.decode(&window).unwrap();
//! for track in &seq.tracks {
//!     println!("track {}: {} events", track.index, track.events.len());
//! }
//! ```
//!
//! Decoding is a pure, single-threaded, CPU-bound transformation: no I/O
//! happens mid-decode, and independent sequences may be decoded
//! concurrently by the caller.

#![warn(missing_docs)]

pub mod byte_window;
pub mod event;
pub mod formats;
pub mod lfo;
pub mod midi;
pub mod sequence;
pub mod timing;
pub mod track;

/// Error type for sequence decoding operations
#[derive(thiserror::Error, Debug)]
pub enum SeqError {
    /// The sequence header failed its sanity check; no output is produced
    #[error("format header mismatch: {0}")]
    HeaderMismatch(String),

    /// A byte-window access fell outside the loaded window
    #[error("read out of range: offset {offset:#x} (needed {needed} bytes, window {start:#x}..{end:#x})")]
    OutOfRange {
        /// Virtual offset that was accessed
        offset: u32,
        /// Number of bytes required by the read
        needed: u32,
        /// Start of the valid window
        start: u32,
        /// End of the valid window (exclusive)
        end: u32,
    },

    /// IO error from the filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SeqError {
    fn from(msg: String) -> Self {
        SeqError::Other(msg)
    }
}

impl From<&str> for SeqError {
    fn from(msg: &str) -> Self {
        SeqError::Other(msg.to_string())
    }
}

/// Result type for sequence decoding operations
pub type Result<T> = std::result::Result<T, SeqError>;

// Public API exports
pub use byte_window::{ByteWindow, Endian};
pub use event::{DecodedEvent, EventKind, EventPriority, MarkerKind};
#[cfg(feature = "cps")]
pub use formats::CpsV2Family;
pub use formats::FormatKind;
pub use midi::{MidiEmitter, MidiMessage, TimedMessage};
pub use sequence::{DecodedSequence, SequenceDecoder};
pub use timing::{TempoMap, TempoMapEntry, PPQN};
pub use track::{DecodeStep, DecodedTrack, SeqHandler, TrackDecoder, TrackState};
