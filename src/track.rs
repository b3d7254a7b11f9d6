//! Generic per-track decode loop
//!
//! A [`TrackDecoder`] walks one track's byte range and delegates every
//! status byte to a format-specific [`SeqHandler`]. The loop owns cursor
//! movement, the tick clock, loop-target validation and the step cap;
//! handlers only decode single events and report how the cursor moves.

use log::warn;
use serde::Serialize;

use crate::byte_window::ByteWindow;
use crate::event::{DecodedEvent, EventKind};

/// Upper bound on decode steps per track. Loop constructs are bounded by
/// their counters, so a well-formed track terminates far below this.
const STEP_LIMIT: u32 = 1 << 20;

/// Lifecycle of a single track decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    /// Not decoded yet
    Ready,
    /// Decode in progress
    Decoding,
    /// Terminated normally (end opcode, infinite loop, or range exhausted)
    Ended,
    /// Terminated on a fatal handler or range error
    EndedWithError,
}

/// How the cursor moves after one decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStep {
    /// Advance the cursor by this many consumed bytes
    Continue(u32),
    /// Jump the cursor to an absolute virtual offset (loop target)
    Jump(u32),
    /// Track finished normally
    End,
    /// Unrecoverable decode error; the track ends with this message
    Fatal(String),
}

/// Per-track decode context handed to handlers.
///
/// Handlers read bytes at `cursor` through `window`, emit events at the
/// current tick, and advance the clock for notes and rests.
pub struct TrackContext<'a> {
    /// Source bytes
    pub window: &'a ByteWindow,
    /// Virtual offset of the status byte being decoded
    pub cursor: u32,
    /// Absolute tick of the event being decoded
    pub tick: u64,
    /// First byte of this track's range
    pub track_start: u32,
    /// One past the last byte of this track's range
    pub track_end: u32,
    events: Vec<DecodedEvent>,
}

impl<'a> TrackContext<'a> {
    fn new(window: &'a ByteWindow, start: u32, end: u32) -> Self {
        Self {
            window,
            cursor: start,
            tick: 0,
            track_start: start,
            track_end: end,
            events: Vec::new(),
        }
    }

    /// Record an event at the current tick, spanning `len` source bytes
    /// from `offset`.
    pub fn emit(&mut self, offset: u32, len: u32, kind: EventKind) {
        self.events
            .push(DecodedEvent::new(offset, len, self.tick, kind));
    }

    /// Move the tick clock forward.
    pub fn advance(&mut self, ticks: u32) {
        self.tick += u64::from(ticks);
    }
}

/// Format-specific event decoder.
///
/// One handler instance is created per track so that modal state (octave,
/// duration scale, transpose, loop slots) never leaks across tracks.
pub trait SeqHandler {
    /// Clear all modal state before a track decode.
    fn reset_state(&mut self);

    /// Decode the event at `ctx.cursor` and report the cursor movement.
    fn read_event(&mut self, ctx: &mut TrackContext) -> DecodeStep;
}

/// Result of decoding one track.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedTrack {
    /// Track index within the sequence
    pub index: usize,
    /// First byte of the track's range
    pub start: u32,
    /// One past the last byte of the track's range
    pub end: u32,
    /// Terminal state
    pub state: TrackState,
    /// Error message when `state` is [`TrackState::EndedWithError`]
    pub error: Option<String>,
    /// Decoded events, in tick order
    pub events: Vec<DecodedEvent>,
    /// Total musical length in ticks
    pub total_ticks: u64,
}

/// Walks one track's byte range with a [`SeqHandler`].
#[derive(Debug, Clone)]
pub struct TrackDecoder {
    index: usize,
    start: u32,
    end: u32,
}

impl TrackDecoder {
    /// Decoder for track `index` covering `[start, end)`.
    pub fn new(index: usize, start: u32, end: u32) -> Self {
        Self { index, start, end }
    }

    /// Decode the whole track. Never panics; malformed input ends the
    /// track with [`TrackState::EndedWithError`].
    pub fn decode(&mut self, handler: &mut dyn SeqHandler, window: &ByteWindow) -> DecodedTrack {
        handler.reset_state();
        let mut ctx = TrackContext::new(window, self.start, self.end);
        let mut state = TrackState::Decoding;
        let mut error = None;
        let mut steps = 0u32;

        while ctx.cursor < ctx.track_end {
            steps += 1;
            if steps > STEP_LIMIT {
                warn!(
                    "track {}: decode step limit reached at {:#x}",
                    self.index, ctx.cursor
                );
                state = TrackState::EndedWithError;
                error = Some("decode step limit reached".to_string());
                break;
            }
            let ev_start = ctx.cursor;
            match handler.read_event(&mut ctx) {
                DecodeStep::Continue(consumed) => {
                    ctx.cursor = ev_start + consumed;
                }
                DecodeStep::Jump(target) => {
                    if !window.is_valid_offset(target) {
                        warn!(
                            "track {}: jump target {:#x} outside window",
                            self.index, target
                        );
                        state = TrackState::EndedWithError;
                        error = Some(format!("jump target {:#x} outside window", target));
                        break;
                    }
                    ctx.cursor = target;
                }
                DecodeStep::End => {
                    state = TrackState::Ended;
                    break;
                }
                DecodeStep::Fatal(msg) => {
                    warn!("track {}: {}", self.index, msg);
                    state = TrackState::EndedWithError;
                    error = Some(msg);
                    break;
                }
            }
        }
        if state == TrackState::Decoding {
            // Ran off the declared range without an end opcode.
            state = TrackState::Ended;
        }

        DecodedTrack {
            index: self.index,
            start: self.start,
            end: self.end,
            state,
            error,
            total_ticks: ctx.tick,
            events: ctx.events,
        }
    }
}
