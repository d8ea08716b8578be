// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! In-process MIDI ports.
//!
//! The virtual transport lets the caller add and remove endpoints and push
//! messages into them, which is how the recorder is exercised without
//! hardware attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::DeviceError;

use super::backend::{InputConnection, MidiBackend, RawMessage};

#[derive(Default)]
struct VirtualState {
    ports: Vec<String>,
    links: Vec<PortLink>,
    fail_enumeration: bool,
}

struct PortLink {
    port: String,
    tx: Sender<RawMessage>,
    open: Arc<AtomicBool>,
}

/// Shared handle to a set of virtual input ports
#[derive(Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with the given ports already plugged in
    pub fn with_ports<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for name in names {
            backend.add_port(name);
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug in a port (no-op if it already exists)
    pub fn add_port(&self, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.lock();
        if !state.ports.contains(&name) {
            state.ports.push(name);
        }
    }

    /// Unplug a port, closing every connection to it
    pub fn remove_port(&self, name: &str) {
        let mut state = self.lock();
        state.ports.retain(|p| p != name);
        state.links.retain(|link| {
            if link.port == name {
                link.open.store(false, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
    }

    /// Make enumeration fail until reset
    pub fn set_enumeration_failure(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Deliver a message to every open connection on `port`, stamped now.
    ///
    /// Returns the number of connections that received it.
    pub fn send(&self, port: &str, bytes: &[u8]) -> usize {
        self.send_at(port, bytes, Instant::now())
    }

    /// Deliver a message with an explicit arrival time
    pub fn send_at(&self, port: &str, bytes: &[u8], received_at: Instant) -> usize {
        let mut state = self.lock();
        state.links.retain(|link| link.open.load(Ordering::SeqCst));

        let mut delivered = 0;
        for link in state.links.iter().filter(|link| link.port == port) {
            if link.tx.send(RawMessage::new(bytes, received_at)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of open connections on `port`
    pub fn connection_count(&self, port: &str) -> usize {
        self.lock()
            .links
            .iter()
            .filter(|link| link.port == port && link.open.load(Ordering::SeqCst))
            .count()
    }
}

impl MidiBackend for VirtualBackend {
    fn input_names(&self) -> Result<Vec<String>, DeviceError> {
        let state = self.lock();
        if state.fail_enumeration {
            return Err(DeviceError::Backend("virtual enumeration failure".to_string()));
        }
        Ok(state.ports.clone())
    }

    fn connect(&self, name: &str) -> Result<Box<dyn InputConnection>, DeviceError> {
        let mut state = self.lock();
        if !state.ports.iter().any(|p| p == name) {
            return Err(DeviceError::NotFound {
                name: name.to_string(),
                available: state.ports.clone(),
            });
        }

        let (tx, rx) = mpsc::channel();
        let open = Arc::new(AtomicBool::new(true));
        state.links.push(PortLink {
            port: name.to_string(),
            tx,
            open: Arc::clone(&open),
        });

        Ok(Box::new(VirtualConnection { receiver: rx, open }))
    }
}

/// Connection to a virtual port
pub struct VirtualConnection {
    receiver: Receiver<RawMessage>,
    open: Arc<AtomicBool>,
}

impl InputConnection for VirtualConnection {
    fn try_recv(&mut self) -> Option<RawMessage> {
        self.receiver.try_recv().ok()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
