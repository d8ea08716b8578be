// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Recording and persistence.
//!
//! This module provides:
//! - Standard MIDI file encoding
//! - Auto and manual save files
//! - The monitor that drives capture, auto-save and reconnection

pub mod monitor;
pub mod smf;
pub mod writer;

pub use monitor::{
    Monitor, MonitorOptions, MonitorPhase, MonitorSettings, MonitorStatus, StatusSink,
};
pub use smf::SmfEncoder;
pub use writer::{FileWriter, SaveKind, SavedFileRecord, MANUAL_PREFIX};
