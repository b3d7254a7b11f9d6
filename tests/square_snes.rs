//! End-to-end decoding of Square-SNES sequences through the public API.

use seqmidi::{ByteWindow, EventKind, FormatKind, SequenceDecoder, TrackState};

/// Header: eight little-endian track offsets relative to the base.
const HEADER_LEN: usize = 8 * 2;

fn sequence(tracks: &[&[u8]]) -> Vec<u8> {
    let mut data = vec![0u8; HEADER_LEN];
    let mut cursor = HEADER_LEN as u16;
    for (i, track) in tracks.iter().enumerate() {
        data[2 * i..2 * i + 2].copy_from_slice(&cursor.to_le_bytes());
        cursor += track.len() as u16;
    }
    for track in tracks {
        data.extend_from_slice(track);
    }
    data
}

fn decode(tracks: &[&[u8]]) -> seqmidi::DecodedSequence {
    let window = ByteWindow::load(sequence(tracks), 0);
    SequenceDecoder::new(FormatKind::SquareSnes, 0)
        .decode(&window)
        .unwrap()
}

#[test]
fn packed_status_resolves_duration_and_pitch() {
    // status 0x1C: slot 2 (0x60 ticks), pitch class 0, octave 4
    let seq = decode(&[&[0x1C, 0xE1]]);
    let track = &seq.tracks[0];
    match &track.events[0].kind {
        EventKind::Note { key, duration, .. } => {
            assert_eq!(*key, 60);
            assert_eq!(*duration, 0x60);
        }
        other => panic!("expected note, got {:?}", other),
    }
}

#[test]
fn explicit_duration_slot_reads_operand() {
    // slot 14 begins at status 196; pitch class 3
    let seq = decode(&[&[196 + 3, 0x2A, 0xE1]]);
    match &seq.tracks[0].events[0].kind {
        EventKind::Note { key, duration, .. } => {
            assert_eq!(*key, 63);
            assert_eq!(*duration, 0x2A);
        }
        other => panic!("expected note, got {:?}", other),
    }
}

#[test]
fn nested_repeats_multiply() {
    let body = [
        0xDE, 0x02, // outer x2
        0xDE, 0x03, // inner x3
        0x70, // note, slot 8 (12 ticks)
        0xDF, // close inner
        0xDF, // close outer
        0xE1,
    ];
    let seq = decode(&[&body]);
    let track = &seq.tracks[0];
    assert_eq!(track.state, TrackState::Ended);
    let notes = track
        .events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Note { .. }))
        .count();
    assert_eq!(notes, 6);
    assert_eq!(track.total_ticks, 6 * 12);
}

#[test]
fn empty_header_is_rejected() {
    let window = ByteWindow::load(vec![0u8; HEADER_LEN], 0);
    let result = SequenceDecoder::new(FormatKind::SquareSnes, 0).decode(&window);
    assert!(result.is_err());
}

#[test]
fn octave_and_transpose_compose() {
    // octave 5, transpose -2, pitch class 4
    let seq = decode(&[&[0xD5, 0x05, 0xD9, 0xFE, 0x04, 0xE1]]);
    let key = seq.tracks[0]
        .events
        .iter()
        .find_map(|e| match e.kind {
            EventKind::Note { key, .. } => Some(key),
            _ => None,
        })
        .unwrap();
    assert_eq!(key, 6 * 12 + 4 - 2);
}
