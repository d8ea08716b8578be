// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Round-the-clock MIDI recorder.
//!
//! Captures a live MIDI input into memory and writes it out as Standard MIDI
//! Files after a period of inactivity or on request, riding out device
//! disconnects without losing buffered notes.

pub mod config;
pub mod error;
pub mod midi;
pub mod recording;
pub mod timing;
pub mod ui;

pub use error::{DeviceError, FileError, MonitorError, TimerError};
pub use recording::{Monitor, MonitorOptions, MonitorSettings, MonitorStatus};
