// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Error types for the recorder core.
//!
//! Each component reports its own failures; the [`Monitor`](crate::recording::Monitor)
//! converts them into notices and status changes so nothing escapes `tick()`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// MIDI device and connection errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The catalog is empty
    #[error("no MIDI input ports available")]
    NoDevices,
    /// The requested endpoint is not in the catalog and no replacement was chosen
    #[error("MIDI input port '{name}' not found (available: {available:?})")]
    NotFound { name: String, available: Vec<String> },
    /// The open session stopped delivering or vanished from the catalog
    #[error("connection to '{0}' lost")]
    ConnectionLost(String),
    /// Reconnection and alternative search were exhausted
    #[error("MIDI device failed: {0}")]
    Failed(String),
    /// The transport itself reported an error
    #[error("MIDI backend error: {0}")]
    Backend(String),
}

/// File output errors
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to write MIDI file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy {from:?} to {to:?}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to scan directory {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Auto-save timer contract violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("auto-save timer is already armed")]
    AlreadyArmed,
}

/// Errors surfaced by the monitor's public operations
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitoring is already running")]
    AlreadyMonitoring,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Timer(#[from] TimerError),
}
