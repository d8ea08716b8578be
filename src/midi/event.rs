// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Captured MIDI events.
//!
//! This module provides the buffered event type, raw message parsing and the
//! held-note table used to repair controllers that mis-encode note-offs.

use super::messages;

/// Number of MIDI note numbers (0-127)
pub const NOTE_COUNT: usize = 128;

/// Broad classification of a captured event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
    /// Any other channel voice message (program change, pitch bend, aftertouch)
    Other,
}

/// A channel voice message stamped with the milliseconds since the previous event.
///
/// The status byte carries both kind and channel. A note-on with velocity 0
/// keeps kind [`EventKind::NoteOn`]; it is the canonical note-off form that
/// the cable workaround emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    status: u8,
    data: Vec<u8>,
    delta_ms: u32,
}

impl MidiEvent {
    /// Parse raw MIDI bytes into an event.
    ///
    /// Only channel voice messages (status 0x80-0xEF) with their full data
    /// length are accepted; system messages and truncated input return `None`.
    pub fn parse(bytes: &[u8], delta_ms: u32) -> Option<Self> {
        let status = *bytes.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }

        let len = data_len(status);
        if bytes.len() < 1 + len {
            return None;
        }

        Some(Self {
            status,
            data: bytes[1..=len].iter().map(|b| b & 0x7F).collect(),
            delta_ms,
        })
    }

    /// Note on: channel (0-15), note (0-127), velocity (0-127)
    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            status: messages::NOTE_ON | (channel & 0x0F),
            data: vec![note & 0x7F, velocity & 0x7F],
            delta_ms: 0,
        }
    }

    /// Note off: channel (0-15), note (0-127), velocity (0-127)
    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            status: messages::NOTE_OFF | (channel & 0x0F),
            data: vec![note & 0x7F, velocity & 0x7F],
            delta_ms: 0,
        }
    }

    /// Control change: channel (0-15), controller (0-127), value (0-127)
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            status: messages::CONTROL_CHANGE | (channel & 0x0F),
            data: vec![controller & 0x7F, value & 0x7F],
            delta_ms: 0,
        }
    }

    /// Same event with a different delta-time
    pub fn with_delta(mut self, delta_ms: u32) -> Self {
        self.delta_ms = delta_ms;
        self
    }

    pub fn kind(&self) -> EventKind {
        match self.status & 0xF0 {
            messages::NOTE_ON => EventKind::NoteOn,
            messages::NOTE_OFF => EventKind::NoteOff,
            messages::CONTROL_CHANGE => EventKind::ControlChange,
            _ => EventKind::Other,
        }
    }

    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    /// Data bytes following the status byte
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn delta_ms(&self) -> u32 {
        self.delta_ms
    }

    /// Note number for note-on/note-off events
    pub fn note(&self) -> Option<u8> {
        match self.kind() {
            EventKind::NoteOn | EventKind::NoteOff => self.data.first().copied(),
            _ => None,
        }
    }

    /// Velocity for note-on/note-off events
    pub fn velocity(&self) -> Option<u8> {
        match self.kind() {
            EventKind::NoteOn | EventKind::NoteOff => self.data.get(1).copied(),
            _ => None,
        }
    }

    /// Status byte followed by data bytes, as sent on the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.data.len());
        bytes.push(self.status);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// Number of data bytes following a channel voice status byte
fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        messages::PROGRAM_CHANGE | messages::CHANNEL_AFTERTOUCH => 1,
        _ => 2,
    }
}

/// Per-note held flags for the cable workaround.
///
/// Some controllers send a second note-on (or a mirrored note-off) where a
/// note-off belongs. While a note is held, the next note message for it is
/// rewritten to note-on velocity 0 and the flag is cleared. A fresh note-on
/// with non-zero velocity sets the flag; a velocity-0 note-on is already a
/// note-off and never marks the note held. Legitimate fast re-triggers on one
/// note are folded into note-offs as a result.
#[derive(Debug, Clone)]
pub struct HeldNotes {
    held: [bool; NOTE_COUNT],
}

impl HeldNotes {
    pub fn new() -> Self {
        Self {
            held: [false; NOTE_COUNT],
        }
    }

    /// Rewrite an incoming event according to the held table
    pub fn apply(&mut self, event: MidiEvent) -> MidiEvent {
        let Some(note) = event.note() else {
            return event;
        };
        let slot = &mut self.held[note as usize];

        if *slot {
            *slot = false;
            return MidiEvent::note_on(event.channel(), note, 0).with_delta(event.delta_ms());
        }

        if event.kind() == EventKind::NoteOn && event.velocity().unwrap_or(0) > 0 {
            *slot = true;
        }
        event
    }

    pub fn is_held(&self, note: u8) -> bool {
        self.held[(note & 0x7F) as usize]
    }

    pub fn reset(&mut self) {
        self.held = [false; NOTE_COUNT];
    }
}

impl Default for HeldNotes {
    fn default() -> Self {
        Self::new()
    }
}
