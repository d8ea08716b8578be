// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Standard MIDI file encoding.
//!
//! Captured events become a format 1 file with a single track: a tempo meta
//! event at tick 0, the events in buffer order, then end of track. Stored
//! millisecond deltas are written as tick deltas unchanged, except that the
//! first event is pinned to tick 0.

use std::io::{self, Write};

use crate::midi::{messages, MidiEvent};

/// Ticks per quarter note written to the header
pub const TICKS_PER_QUARTER: u16 = 480;

/// Tempo written as the first track event
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Largest delta a variable-length quantity can hold
const MAX_DELTA: u32 = 0x0FFF_FFFF;

/// One encoded track event
#[derive(Debug, Clone)]
struct TrackEvent {
    delta: u32,
    data: Vec<u8>,
}

impl TrackEvent {
    fn tempo(bpm: f64) -> Self {
        let microseconds = (60_000_000.0 / bpm) as u32;
        Self {
            delta: 0,
            data: vec![
                messages::META,
                messages::META_SET_TEMPO,
                0x03,
                ((microseconds >> 16) & 0xFF) as u8,
                ((microseconds >> 8) & 0xFF) as u8,
                (microseconds & 0xFF) as u8,
            ],
        }
    }

    fn channel(event: &MidiEvent, delta: u32) -> Self {
        Self {
            delta: delta.min(MAX_DELTA),
            data: event.to_bytes(),
        }
    }

    fn end_of_track() -> Self {
        Self {
            delta: 0,
            data: vec![messages::META, messages::META_END_OF_TRACK, 0x00],
        }
    }
}

/// Encoder for captured event buffers
#[derive(Debug, Clone)]
pub struct SmfEncoder {
    ppqn: u16,
    tempo: f64,
}

impl SmfEncoder {
    pub fn new() -> Self {
        Self {
            ppqn: TICKS_PER_QUARTER,
            tempo: DEFAULT_TEMPO_BPM,
        }
    }

    pub fn ppqn(&self) -> u16 {
        self.ppqn
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Encode `events` into a complete file image
    pub fn encode(&self, events: &[MidiEvent]) -> Vec<u8> {
        let mut track = Vec::with_capacity(events.len() + 2);
        track.push(TrackEvent::tempo(self.tempo));
        for (i, event) in events.iter().enumerate() {
            let delta = if i == 0 { 0 } else { event.delta_ms() };
            track.push(TrackEvent::channel(event, delta));
        }
        track.push(TrackEvent::end_of_track());

        let mut bytes = Vec::new();
        self.write_header(&mut bytes, 1, 1);
        write_track(&mut bytes, &track);
        bytes
    }

    /// Encode `events` into `writer`
    pub fn write<W: Write>(&self, writer: &mut W, events: &[MidiEvent]) -> io::Result<()> {
        writer.write_all(&self.encode(events))
    }

    /// MThd chunk
    fn write_header(&self, out: &mut Vec<u8>, format: u16, num_tracks: u16) {
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&format.to_be_bytes());
        out.extend_from_slice(&num_tracks.to_be_bytes());
        out.extend_from_slice(&self.ppqn.to_be_bytes());
    }
}

impl Default for SmfEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// MTrk chunk
fn write_track(out: &mut Vec<u8>, events: &[TrackEvent]) {
    let mut track_data = Vec::new();
    for event in events {
        write_variable_length(&mut track_data, event.delta);
        track_data.extend_from_slice(&event.data);
    }

    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
    out.extend_from_slice(&track_data);
}

/// Variable-length quantity, most significant group first
fn write_variable_length(out: &mut Vec<u8>, mut value: u32) {
    let mut bytes = Vec::with_capacity(4);

    bytes.push((value & 0x7F) as u8);
    value >>= 7;

    while value > 0 {
        bytes.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }

    bytes.reverse();
    out.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_defaults() {
        let encoder = SmfEncoder::new();
        assert_eq!(encoder.ppqn(), 480);
        assert_eq!(encoder.tempo(), 120.0);
    }

    #[test]
    fn test_header() {
        let bytes = SmfEncoder::new().encode(&[]);

        assert_eq!(&bytes[0..4], b"MThd");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 6]);
        assert_eq!(&bytes[8..10], &1u16.to_be_bytes()); // Format 1
        assert_eq!(&bytes[10..12], &1u16.to_be_bytes()); // One track
        assert_eq!(&bytes[12..14], &480u16.to_be_bytes());
        assert_eq!(&bytes[14..18], b"MTrk");
    }

    #[test]
    fn test_empty_track_has_tempo_and_end() {
        let bytes = SmfEncoder::new().encode(&[]);
        let track = &bytes[22..];
        assert_eq!(
            track,
            &[0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, 0x00, 0xFF, 0x2F, 0x00]
        );
        assert_eq!(&bytes[18..22], &(track.len() as u32).to_be_bytes());
    }

    #[test]
    fn test_first_delta_forced_to_zero() {
        let events = vec![
            MidiEvent::note_on(0, 60, 100).with_delta(1500),
            MidiEvent::note_on(0, 60, 0).with_delta(200),
        ];
        let bytes = SmfEncoder::new().encode(&events);
        let track = &bytes[22..];

        // After the 7-byte tempo event
        assert_eq!(&track[7..11], &[0x00, 0x90, 60, 100]);
        // 200 = 0x81 0x48
        assert_eq!(&track[11..16], &[0x81, 0x48, 0x90, 60, 0]);
    }

    #[test]
    fn test_oversized_delta_is_clamped() {
        let events = vec![
            MidiEvent::note_on(0, 60, 100),
            MidiEvent::note_on(0, 60, 0).with_delta(u32::MAX),
        ];
        let bytes = SmfEncoder::new().encode(&events);
        let track = &bytes[22..];
        assert_eq!(&track[11..15], &[0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_variable_length() {
        let mut buffer = Vec::new();

        write_variable_length(&mut buffer, 0);
        assert_eq!(buffer, vec![0x00]);

        buffer.clear();
        write_variable_length(&mut buffer, 127);
        assert_eq!(buffer, vec![0x7F]);

        buffer.clear();
        write_variable_length(&mut buffer, 128);
        assert_eq!(buffer, vec![0x81, 0x00]);

        buffer.clear();
        write_variable_length(&mut buffer, 16383);
        assert_eq!(buffer, vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_tempo_event() {
        let event = TrackEvent::tempo(120.0);
        // 120 BPM = 500000 microseconds per beat = 0x07A120
        assert_eq!(event.data, vec![0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]);
    }

    #[test]
    fn test_write_to_writer() {
        let mut out = Vec::new();
        SmfEncoder::new()
            .write(&mut out, &[MidiEvent::control_change(1, 7, 100)])
            .unwrap();
        assert_eq!(out, SmfEncoder::new().encode(&[MidiEvent::control_change(1, 7, 100)]));
    }
}
