// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Timing module.
//!
//! This module provides the inactivity deadline that drives automatic saves.

pub mod autosave;

pub use autosave::{AutoSaveTimer, FireCallback, TimerState};
