//! End-to-end decoding of CPS v1 sequences through the public API.

use approx::assert_relative_eq;
use seqmidi::{ByteWindow, EventKind, FormatKind, SequenceDecoder, TrackState};

/// Header: flag byte plus twelve big-endian track offsets relative to
/// the header base.
const HEADER_LEN: usize = 1 + 12 * 2;

fn sequence(tracks: &[&[u8]]) -> Vec<u8> {
    let mut data = vec![0u8; HEADER_LEN];
    let mut cursor = HEADER_LEN as u16;
    for (i, track) in tracks.iter().enumerate() {
        data[1 + 2 * i..3 + 2 * i].copy_from_slice(&cursor.to_be_bytes());
        cursor += track.len() as u16;
    }
    for track in tracks {
        data.extend_from_slice(track);
    }
    data
}

fn decode(tracks: &[&[u8]], rev: u16) -> seqmidi::DecodedSequence {
    let window = ByteWindow::load(sequence(tracks), 0);
    SequenceDecoder::new(FormatKind::CpsV1 { rev }, 0)
        .decode(&window)
        .unwrap()
}

#[test]
fn duration_scale_reaches_following_notes() {
    // scale 0x40, then a slot-0 note (full value 192 ticks)
    let seq = decode(&[&[0x06, 0x40, 0x21, 0x00]], 140);
    let track = &seq.tracks[0];
    assert_eq!(track.state, TrackState::Ended);
    let dur = track
        .events
        .iter()
        .find_map(|e| match e.kind {
            EventKind::Note { duration, .. } => Some(duration),
            _ => None,
        })
        .unwrap();
    assert_eq!(dur, 192 * 0x40 / 256);
}

#[test]
fn conductor_track_tempo_lands_in_map() {
    let seq = decode(&[&[0x07, 120, 0x21, 0x00], &[0x41, 0x00]], 140);
    assert_eq!(seq.tempo_map.entries().len(), 1);
    assert_eq!(seq.tempo_map.micros_per_quarter_at(0), 500_000);
    assert_eq!(seq.tracks.len(), 2);
}

#[test]
fn pre_140_tempo_word_is_scaled() {
    let seq = decode(&[&[0x07, 0x01, 0x00, 0x00]], 110);
    let bpm = seq.tracks[0]
        .events
        .iter()
        .find_map(|e| match e.kind {
            EventKind::TempoBpm { bpm } => Some(bpm),
            _ => None,
        })
        .unwrap();
    assert_relative_eq!(bpm, 256.0 / 3.2768);
}

#[test]
fn decoding_is_deterministic() {
    let tracks: &[&[u8]] = &[&[0x01, 0x03, 0x21, 0x41, 0x61, 0x00], &[0x07, 90, 0x00]];
    let a = decode(tracks, 140);
    let b = decode(tracks, 140);
    for (ta, tb) in a.tracks.iter().zip(&b.tracks) {
        assert_eq!(ta.events, tb.events);
        assert_eq!(ta.total_ticks, tb.total_ticks);
    }
}

#[test]
fn malformed_loop_terminates_instead_of_hanging() {
    // slot 0 re-armed with a different destination on the second pass
    let body = [
        0x13, 0x05, 0x00, 0x1D, // arm slot 0, dest 0x001D (the note)
        0x21, // 0x001D: note
        0x13, 0x05, 0x00, 0x20, // same slot, different dest
        0x00,
    ];
    let seq = decode(&[&body], 140);
    let track = &seq.tracks[0];
    assert_eq!(track.state, TrackState::Ended);
    assert!(track
        .events
        .iter()
        .any(|e| matches!(e.kind, EventKind::EndOfTrack)));
}

#[test]
fn truncated_track_ends_with_error() {
    // opcode 0x07 (tempo) with its operand cut off at the window end
    let seq = decode(&[&[0x21, 0x07]], 140);
    assert_eq!(seq.tracks[0].state, TrackState::EndedWithError);
    assert!(seq.tracks[0].error.is_some());
}
