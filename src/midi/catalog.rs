// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Input endpoint discovery.
//!
//! The catalog never fails: enumeration errors are logged and reported as an
//! empty port list, which callers treat as "nothing plugged in".

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::backend::MidiBackend;

/// A visible input endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Position in the platform list
    pub index: usize,
    pub name: String,
}

/// Enumerates and watches input endpoints
#[derive(Clone)]
pub struct DeviceCatalog {
    backend: Arc<dyn MidiBackend>,
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn MidiBackend> {
        Arc::clone(&self.backend)
    }

    /// Currently visible endpoint names (empty on enumeration failure)
    pub fn list_inputs(&self) -> Vec<String> {
        match self.backend.input_names() {
            Ok(names) => {
                debug!(?names, "Enumerated MIDI inputs");
                names
            }
            Err(e) => {
                warn!("MIDI input enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Visible endpoints with their list positions
    pub fn describe(&self) -> Vec<PortInfo> {
        self.list_inputs()
            .into_iter()
            .enumerate()
            .map(|(index, name)| PortInfo { index, name })
            .collect()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.list_inputs().iter().any(|n| n == name)
    }

    /// `original` if still present, otherwise the first visible endpoint
    pub fn find_alternative(&self, original: &str) -> Option<String> {
        let inputs = self.list_inputs();
        if inputs.iter().any(|n| n == original) {
            return Some(original.to_string());
        }
        inputs.into_iter().next()
    }

    /// Open and immediately close a connection to `name`
    pub fn test_connection(&self, name: &str) -> bool {
        match self.backend.connect(name) {
            Ok(mut connection) => {
                let open = connection.is_open();
                connection.close();
                debug!(port = name, open, "MIDI connection test");
                open
            }
            Err(e) => {
                warn!("MIDI connection test for '{}' failed: {}", name, e);
                false
            }
        }
    }

    /// Poll until `name` reappears or `timeout` elapses.
    ///
    /// Blocks the calling thread for up to `timeout`.
    pub fn wait_for_reconnect(&self, name: &str, timeout: Duration, poll_interval: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_available(name) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(poll_interval.min(deadline - now));
        }
    }
}
