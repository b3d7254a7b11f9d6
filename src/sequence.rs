//! Sequence-level decoding: header parsing and track orchestration
//!
//! A sequence is a header (format-specific flags and a track-pointer
//! table) followed by the track byte streams. [`SequenceDecoder`] parses
//! the header, runs every present track through a fresh handler, builds
//! the tempo map from the first decoded track, and applies the LFO
//! post-pass.

use log::{debug, warn};
use serde::Serialize;

use crate::byte_window::{ByteWindow, Endian};
use crate::formats::FormatKind;
use crate::lfo;
use crate::timing::{TempoMap, PPQN};
use crate::track::{DecodedTrack, TrackDecoder};
use crate::{Result, SeqError};

#[cfg(feature = "cps")]
bitflags::bitflags! {
    /// Header flag byte of CPS-family sequences.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpsHeaderFlags: u8 {
        /// Sequence uses the percussion sample set
        const PERCUSSION = 0x01;
        /// Echo processing enabled
        const ECHO = 0x02;
        /// Must be clear in well-formed sequences
        const RESERVED = 0x80;
    }
}

/// A fully decoded sequence.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedSequence {
    /// Format the sequence was decoded as
    pub format: FormatKind,
    /// Tracks in header order; absent tracks are skipped
    pub tracks: Vec<DecodedTrack>,
    /// Tempo changes taken from the first decoded track
    pub tempo_map: TempoMap,
    /// Ticks per quarter note
    pub ppqn: u16,
}

/// Parses a sequence header and decodes every track.
#[derive(Debug, Clone)]
pub struct SequenceDecoder {
    format: FormatKind,
    base: u32,
}

struct TrackSpan {
    index: usize,
    start: u32,
    end: u32,
}

impl SequenceDecoder {
    /// Decoder for a sequence whose header begins at virtual offset
    /// `base`.
    pub fn new(format: FormatKind, base: u32) -> Self {
        Self { format, base }
    }

    /// Decode the whole sequence. Header sanity failures abort with
    /// [`SeqError::HeaderMismatch`]; per-track decode errors only end
    /// the affected track.
    pub fn decode(&self, window: &ByteWindow) -> Result<DecodedSequence> {
        let spans = self.parse_header(window)?;
        debug!(
            "{}: {} of {} tracks present",
            self.format.name(),
            spans.len(),
            self.format.track_count()
        );

        let mut tracks = Vec::with_capacity(spans.len());
        for span in spans {
            let mut handler = self.format.make_handler();
            let track =
                TrackDecoder::new(span.index, span.start, span.end).decode(&mut *handler, window);
            debug!(
                "track {}: {:?}, {} events, {} ticks",
                track.index,
                track.state,
                track.events.len(),
                track.total_ticks
            );
            tracks.push(track);
        }

        let tempo_map = tracks
            .first()
            .map(TempoMap::from_track)
            .unwrap_or_default();
        lfo::run_post_pass(&mut tracks, &tempo_map);

        Ok(DecodedSequence {
            format: self.format,
            tracks,
            tempo_map,
            ppqn: PPQN,
        })
    }

    fn parse_header(&self, window: &ByteWindow) -> Result<Vec<TrackSpan>> {
        match self.format {
            #[cfg(feature = "cps")]
            FormatKind::CpsV1 { .. } => self.parse_cps_header(window, Endian::Big),
            #[cfg(feature = "cps")]
            FormatKind::CpsV2 { .. } => self.parse_cps_header(window, Endian::Little),
            #[cfg(feature = "square-snes")]
            FormatKind::SquareSnes => self.parse_square_snes_header(window),
        }
    }

    /// CPS headers: one flag byte, then relative 16-bit track offsets
    /// (zero meaning the slot is unused).
    #[cfg(feature = "cps")]
    fn parse_cps_header(&self, window: &ByteWindow, endian: Endian) -> Result<Vec<TrackSpan>> {
        let flags_raw = window.get_u8(self.base)?;
        let flags = CpsHeaderFlags::from_bits_retain(flags_raw);
        if flags.contains(CpsHeaderFlags::RESERVED) {
            return Err(SeqError::HeaderMismatch(format!(
                "reserved header flag set ({:#04x})",
                flags_raw
            )));
        }

        let count = self.format.track_count();
        let mut starts = Vec::with_capacity(count);
        for i in 0..count {
            let rel = window.get_u16(self.base + 1 + 2 * i as u32, endian)?;
            starts.push(if rel == 0 { 0 } else { self.base + u32::from(rel) });
        }
        Ok(self.spans_from_starts(window, &starts))
    }

    /// Square-SNES headers: eight absolute-from-base 16-bit offsets,
    /// little-endian, no flag byte.
    #[cfg(feature = "square-snes")]
    fn parse_square_snes_header(&self, window: &ByteWindow) -> Result<Vec<TrackSpan>> {
        let count = self.format.track_count();
        let mut starts = Vec::with_capacity(count);
        for i in 0..count {
            let rel = window.get_u16(self.base + 2 * i as u32, Endian::Little)?;
            starts.push(if rel == 0 { 0 } else { self.base + u32::from(rel) });
        }
        if starts.iter().all(|&s| s == 0) {
            return Err(SeqError::HeaderMismatch(
                "all track pointers are zero".to_string(),
            ));
        }
        Ok(self.spans_from_starts(window, &starts))
    }

    /// Each present track runs until the next-larger track start, or the
    /// window end for the last one.
    fn spans_from_starts(&self, window: &ByteWindow, starts: &[u32]) -> Vec<TrackSpan> {
        let mut spans = Vec::new();
        for (index, &start) in starts.iter().enumerate() {
            if start == 0 {
                continue;
            }
            if !window.is_valid_offset(start) {
                warn!(
                    "track {}: start {:#x} outside window, skipping",
                    index, start
                );
                continue;
            }
            let end = starts
                .iter()
                .filter(|&&other| other > start)
                .min()
                .copied()
                .unwrap_or_else(|| window.end())
                .min(window.end());
            spans.push(TrackSpan { index, start, end });
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "cps")]
    use crate::formats::CpsV2Family;
    use crate::event::EventKind;
    use crate::track::TrackState;

    /// One-track CPS v2 sequence: header at 0, track at 0x21.
    #[cfg(feature = "cps")]
    fn v2_single_track(track_bytes: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 0x21];
        data[1] = 0x21; // track 0 offset, little-endian
        data.extend_from_slice(track_bytes);
        data
    }

    #[cfg(feature = "cps")]
    #[test]
    fn test_decode_single_track_sequence() {
        let data = v2_single_track(&[0xC5, 0x00, 0x02, 0xA0, 60, 0x10, 0xFF]);
        let window = ByteWindow::load(data, 0);
        let decoder = SequenceDecoder::new(
            FormatKind::CpsV2 {
                family: CpsV2Family::Classic,
            },
            0,
        );
        let seq = decoder.decode(&window).unwrap();
        assert_eq!(seq.tracks.len(), 1);
        assert_eq!(seq.tracks[0].state, TrackState::Ended);
        assert_eq!(seq.ppqn, PPQN);
        // tempo from the first track landed in the map
        assert_eq!(seq.tempo_map.entries().len(), 1);
    }

    #[cfg(feature = "cps")]
    #[test]
    fn test_reserved_flag_rejects_header() {
        let mut data = v2_single_track(&[0xFF]);
        data[0] = 0x80;
        let window = ByteWindow::load(data, 0);
        let decoder = SequenceDecoder::new(
            FormatKind::CpsV2 {
                family: CpsV2Family::Classic,
            },
            0,
        );
        match decoder.decode(&window) {
            Err(SeqError::HeaderMismatch(_)) => {}
            other => panic!("expected header mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(feature = "cps")]
    #[test]
    fn test_absent_tracks_are_skipped() {
        // two tracks present in slots 0 and 2
        let mut data = vec![0u8; 0x21];
        data[1] = 0x21;
        data[5] = 0x22;
        data.extend_from_slice(&[0xFF]); // track 0 at 0x21
        data.extend_from_slice(&[0xA0, 60, 0x10, 0xFF]); // track 2 at 0x22
        let window = ByteWindow::load(data, 0);
        let decoder = SequenceDecoder::new(
            FormatKind::CpsV2 {
                family: CpsV2Family::Classic,
            },
            0,
        );
        let seq = decoder.decode(&window).unwrap();
        assert_eq!(seq.tracks.len(), 2);
        assert_eq!(seq.tracks[0].index, 0);
        assert_eq!(seq.tracks[1].index, 2);
        // track 0 is clipped at track 2's start
        assert_eq!(seq.tracks[0].end, 0x22);
    }

    #[cfg(feature = "cps")]
    #[test]
    fn test_out_of_window_track_start_is_skipped() {
        let mut data = vec![0u8; 0x21];
        data[1] = 0x21;
        data[3] = 0xF0; // slot 1 points past the window
        data.extend_from_slice(&[0xFF]);
        let window = ByteWindow::load(data, 0);
        let decoder = SequenceDecoder::new(
            FormatKind::CpsV2 {
                family: CpsV2Family::Classic,
            },
            0,
        );
        let seq = decoder.decode(&window).unwrap();
        assert_eq!(seq.tracks.len(), 1);
        assert_eq!(seq.tracks[0].index, 0);
    }

    #[cfg(feature = "square-snes")]
    #[test]
    fn test_square_snes_all_zero_header_is_rejected() {
        let window = ByteWindow::load(vec![0u8; 0x20], 0);
        let decoder = SequenceDecoder::new(FormatKind::SquareSnes, 0);
        assert!(matches!(
            decoder.decode(&window),
            Err(SeqError::HeaderMismatch(_))
        ));
    }

    #[cfg(feature = "square-snes")]
    #[test]
    fn test_square_snes_header_decode() {
        let mut data = vec![0u8; 0x10];
        data[0] = 0x10; // track 0 at 0x10
        data.extend_from_slice(&[0x00, 0xE1]); // one note, end
        let window = ByteWindow::load(data, 0);
        let decoder = SequenceDecoder::new(FormatKind::SquareSnes, 0);
        let seq = decoder.decode(&window).unwrap();
        assert_eq!(seq.tracks.len(), 1);
        assert!(seq.tracks[0]
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::Note { .. })));
    }

    #[cfg(feature = "cps")]
    #[test]
    fn test_nonzero_base_offsets_are_relative() {
        // header at virtual 0x1000
        let mut data = vec![0u8; 0x21];
        data[1] = 0x21;
        data.extend_from_slice(&[0xA0, 60, 0x10, 0xFF]);
        let window = ByteWindow::load(data, 0x1000);
        let decoder = SequenceDecoder::new(
            FormatKind::CpsV2 {
                family: CpsV2Family::Classic,
            },
            0x1000,
        );
        let seq = decoder.decode(&window).unwrap();
        assert_eq!(seq.tracks[0].start, 0x1021);
    }
}
