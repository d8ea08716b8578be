// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI input layer.
//!
//! This module provides a trait-based transport abstraction so the native
//! midir backend and the in-process virtual ports can be used
//! interchangeably, plus endpoint discovery and event capture on top of it.

pub mod backend;
pub mod catalog;
pub mod event;
pub mod midir_backend;
pub mod receiver;
pub mod virtual_port;

pub use backend::{InputConnection, MidiBackend, RawMessage, Transport};
pub use catalog::{DeviceCatalog, PortInfo};
pub use event::{EventKind, HeldNotes, MidiEvent};
pub use midir_backend::MidirBackend;
pub use receiver::{
    ConnectionState, EventReceiver, PortChooser, SessionClock, SessionInfo, DEFAULT_PORT,
};
pub use virtual_port::VirtualBackend;

/// MIDI message constants
pub mod messages {
    // Channel Voice Messages (upper nibble, lower nibble is channel 0-15)
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_AFTERTOUCH: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    // Meta events (Standard MIDI File only)
    pub const META: u8 = 0xFF;
    pub const META_SET_TEMPO: u8 = 0x51;
    pub const META_END_OF_TRACK: u8 = 0x2F;
}
