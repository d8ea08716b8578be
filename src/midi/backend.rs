// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Transport seam between the recorder and the platform MIDI layer.

use std::sync::Arc;
use std::time::Instant;

use crate::error::DeviceError;

use super::midir_backend::MidirBackend;
use super::virtual_port::VirtualBackend;

/// Raw bytes as delivered by the transport, stamped on arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub bytes: Vec<u8>,
    pub received_at: Instant,
}

impl RawMessage {
    pub fn new(bytes: impl Into<Vec<u8>>, received_at: Instant) -> Self {
        Self {
            bytes: bytes.into(),
            received_at,
        }
    }
}

/// Trait for MIDI input transports.
///
/// Implementations enumerate endpoints by name and open connections that
/// queue incoming messages until polled.
pub trait MidiBackend: Send + Sync {
    /// Names of the currently visible input endpoints, in platform order
    fn input_names(&self) -> Result<Vec<String>, DeviceError>;

    /// Open a connection to the named endpoint
    fn connect(&self, name: &str) -> Result<Box<dyn InputConnection>, DeviceError>;
}

/// An open input connection
pub trait InputConnection: Send {
    /// Next queued message, if any (non-blocking)
    fn try_recv(&mut self) -> Option<RawMessage>;

    /// Whether the connection can still deliver messages
    fn is_open(&self) -> bool;

    /// Close the connection; closing twice is harmless
    fn close(&mut self);
}

/// Transport selection, injected at construction
#[derive(Clone)]
pub enum Transport {
    /// Platform MIDI through midir
    Native { client_name: String },
    /// In-process ports driven by the caller
    Virtual(VirtualBackend),
}

impl Transport {
    pub fn native() -> Self {
        Transport::Native {
            client_name: "midi-recorder".to_string(),
        }
    }

    pub fn into_backend(self) -> Arc<dyn MidiBackend> {
        match self {
            Transport::Native { client_name } => Arc::new(MidirBackend::new(client_name)),
            Transport::Virtual(ports) => Arc::new(ports),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Native { client_name } => {
                f.debug_struct("Native").field("client_name", client_name).finish()
            }
            Transport::Virtual(_) => f.write_str("Virtual"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_transport_shares_ports() {
        let ports = VirtualBackend::new();
        ports.add_port("Loopback");

        let backend = Transport::Virtual(ports.clone()).into_backend();
        assert_eq!(backend.input_names().unwrap(), vec!["Loopback".to_string()]);

        ports.add_port("Second");
        assert_eq!(backend.input_names().unwrap().len(), 2);
    }

    #[test]
    fn test_transport_debug() {
        assert_eq!(format!("{:?}", Transport::Virtual(VirtualBackend::new())), "Virtual");
        assert!(format!("{:?}", Transport::native()).contains("midi-recorder"));
    }
}
