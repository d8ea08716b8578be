// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Native MIDI input through midir.
//!
//! Every call opens a short-lived `MidiInput` client so the port list is
//! always current. Incoming messages are stamped inside the midir callback
//! and queued on a channel until the receiver polls.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{debug, info};

use crate::error::DeviceError;

use super::backend::{InputConnection, MidiBackend, RawMessage};

/// midir-backed transport
#[derive(Debug, Clone)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn client(&self, suffix: &str) -> Result<MidiInput, DeviceError> {
        let mut input = MidiInput::new(&format!("{}-{}", self.client_name, suffix))
            .map_err(|e| DeviceError::Backend(format!("Failed to create MIDI client: {}", e)))?;
        // SysEx, timing clock and active sensing never reach the buffer
        input.ignore(Ignore::All);
        Ok(input)
    }
}

impl MidiBackend for MidirBackend {
    fn input_names(&self) -> Result<Vec<String>, DeviceError> {
        let input = self.client("scan")?;
        let names = input
            .ports()
            .iter()
            .filter_map(|port| input.port_name(port).ok())
            .collect();
        Ok(names)
    }

    fn connect(&self, name: &str) -> Result<Box<dyn InputConnection>, DeviceError> {
        let input = self.client("in")?;
        let port = input
            .ports()
            .into_iter()
            .find(|port| input.port_name(port).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| DeviceError::NotFound {
                name: name.to_string(),
                available: Vec::new(),
            })?;

        let (tx, rx): (Sender<RawMessage>, Receiver<RawMessage>) = mpsc::channel();
        let connection = input
            .connect(
                &port,
                &self.client_name,
                move |_stamp, bytes, _| {
                    let _ = tx.send(RawMessage::new(bytes, Instant::now()));
                },
                (),
            )
            .map_err(|e| DeviceError::Backend(format!("Failed to connect to {}: {}", name, e)))?;

        info!(port = name, "MIDI input connected");
        Ok(Box::new(MidirConnection {
            name: name.to_string(),
            connection: Some(connection),
            receiver: rx,
        }))
    }
}

/// An open midir input connection
pub struct MidirConnection {
    name: String,
    connection: Option<MidiInputConnection<()>>,
    receiver: Receiver<RawMessage>,
}

impl InputConnection for MidirConnection {
    fn try_recv(&mut self) -> Option<RawMessage> {
        self.receiver.try_recv().ok()
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!(port = %self.name, "MIDI input closed");
        }
    }
}

impl Drop for MidirConnection {
    fn drop(&mut self) {
        self.close();
    }
}
