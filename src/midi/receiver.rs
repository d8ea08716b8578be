// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Event capture from one open input session.
//!
//! The receiver owns the connection, the event buffer and the session clock.
//! Delta-times are measured from each message's arrival stamp to the
//! previous buffered event, or to the session start for the first one.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::DeviceError;

use super::backend::InputConnection;
use super::catalog::DeviceCatalog;
use super::event::{HeldNotes, MidiEvent};

/// Port name that resolves to the first available endpoint
pub const DEFAULT_PORT: &str = "default";

/// Default minimum spacing between catalog health checks
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Asked for a replacement when the requested port is missing.
///
/// Receives the missing name and the available names; `None` cancels.
pub type PortChooser = dyn Fn(&str, &[String]) -> Option<String> + Send + Sync;

/// Connection state of the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    /// Terminal until a new start
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Timing reference shared by every event in one logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    pub started_at: Instant,
    pub last_event_at: Option<Instant>,
}

impl SessionClock {
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            last_event_at: None,
        }
    }

    /// Milliseconds from the previous event (or session start) to `at`, rounded down
    pub fn stamp(&mut self, at: Instant) -> u32 {
        let reference = self.last_event_at.unwrap_or(self.started_at);
        let delta = at.saturating_duration_since(reference);
        self.last_event_at = Some(at.max(reference));
        u32::try_from(delta.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Read-only view of the open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub endpoint: String,
    pub open: bool,
    pub started_at: Instant,
    pub last_event_at: Option<Instant>,
}

struct Session {
    endpoint: String,
    connection: Box<dyn InputConnection>,
}

struct HealthCheck {
    interval: Duration,
    last: Option<(Instant, bool)>,
}

/// Receives events from one input endpoint into an in-memory buffer
pub struct EventReceiver {
    catalog: DeviceCatalog,
    state: ConnectionState,
    session: Option<Session>,
    clock: Option<SessionClock>,
    buffer: Vec<MidiEvent>,
    held: HeldNotes,
    new_events: bool,
    health: HealthCheck,
}

impl EventReceiver {
    pub fn new(catalog: DeviceCatalog) -> Self {
        Self {
            catalog,
            state: ConnectionState::Disconnected,
            session: None,
            clock: None,
            buffer: Vec::new(),
            held: HeldNotes::new(),
            new_events: false,
            health: HealthCheck {
                interval: DEFAULT_HEALTH_INTERVAL,
                last: None,
            },
        }
    }

    /// Set the minimum spacing between catalog health checks
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health.interval = interval;
        self
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Open a fresh session on `name`.
    ///
    /// `"default"` resolves to the first endpoint. A missing endpoint fails
    /// with [`DeviceError::NotFound`] unless `chooser` supplies a replacement.
    pub fn open(&mut self, name: &str, chooser: Option<&PortChooser>) -> Result<(), DeviceError> {
        let endpoint = self.resolve(name, chooser)?;
        self.connect(endpoint)?;
        self.clock = Some(SessionClock::new(Instant::now()));
        Ok(())
    }

    /// Switch the session to `name`, keeping the buffer and session clock
    pub fn reopen(&mut self, name: &str) -> Result<(), DeviceError> {
        self.connect(name.to_string())?;
        if self.clock.is_none() {
            self.clock = Some(SessionClock::new(Instant::now()));
        }
        Ok(())
    }

    fn resolve(&self, name: &str, chooser: Option<&PortChooser>) -> Result<String, DeviceError> {
        let available = self.catalog.list_inputs();
        let Some(first) = available.first() else {
            return Err(DeviceError::NoDevices);
        };

        let requested = if name == DEFAULT_PORT {
            first.clone()
        } else {
            name.to_string()
        };
        if available.contains(&requested) {
            return Ok(requested);
        }

        match chooser.and_then(|choose| choose(&requested, &available)) {
            Some(choice) if available.contains(&choice) => {
                info!(requested = %requested, chosen = %choice, "Using replacement MIDI input");
                Ok(choice)
            }
            _ => Err(DeviceError::NotFound {
                name: requested,
                available,
            }),
        }
    }

    fn connect(&mut self, endpoint: String) -> Result<(), DeviceError> {
        if let Some(mut old) = self.session.take() {
            old.connection.close();
        }

        let connection = self.catalog.backend().connect(&endpoint)?;
        info!(port = %endpoint, "Session opened");
        self.session = Some(Session {
            endpoint,
            connection,
        });
        self.held.reset();
        self.health.last = None;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Close the session. The buffer is kept.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.connection.close();
            info!(port = %session.endpoint, "Session closed");
        }
        self.clock = None;
        self.health.last = None;
        self.new_events = false;
        self.state = ConnectionState::Disconnected;
    }

    /// Move every pending message from the transport into the buffer (non-blocking)
    pub fn poll(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let clock = self
            .clock
            .get_or_insert_with(|| SessionClock::new(Instant::now()));

        while let Some(raw) = session.connection.try_recv() {
            let Some(event) = MidiEvent::parse(&raw.bytes, 0) else {
                debug!(bytes = ?raw.bytes, "Ignoring non-channel message");
                continue;
            };
            let delta = clock.stamp(raw.received_at);
            let event = self.held.apply(event.with_delta(delta));
            debug!(status = event.status(), data = ?event.data(), delta_ms = delta, "Captured event");
            self.buffer.push(event);
            self.new_events = true;
        }
    }

    /// Whether the session is still usable.
    ///
    /// A closed connection fails immediately; the catalog lookup runs at most
    /// once per health interval and the cached answer is returned in between.
    pub fn check_health(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };

        if !session.connection.is_open() {
            self.mark_disconnected();
            return false;
        }

        if let Some((checked_at, healthy)) = self.health.last {
            if checked_at.elapsed() < self.health.interval {
                return healthy;
            }
        }

        let healthy = self.catalog.is_available(&session.endpoint);
        self.health.last = Some((Instant::now(), healthy));
        if !healthy {
            self.mark_disconnected();
        }
        healthy
    }

    fn mark_disconnected(&mut self) {
        if self.state == ConnectionState::Connected {
            warn!(port = ?self.endpoint(), "MIDI input no longer available");
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Take the buffered events, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<MidiEvent> {
        std::mem::take(&mut self.buffer)
    }

    /// Copy of the buffered events
    pub fn peek(&self) -> Vec<MidiEvent> {
        self.buffer.clone()
    }

    pub fn has_events(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn count(&self) -> usize {
        self.buffer.len()
    }

    /// Empty the buffer; the session clock keeps running
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Read and reset the "new events since last check" flag
    pub fn consume_new_events_flag(&mut self) -> bool {
        std::mem::take(&mut self.new_events)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.endpoint.as_str())
    }

    pub fn session(&self) -> Option<SessionInfo> {
        let session = self.session.as_ref()?;
        let clock = self.clock?;
        Some(SessionInfo {
            endpoint: session.endpoint.clone(),
            open: session.connection.is_open(),
            started_at: clock.started_at,
            last_event_at: clock.last_event_at,
        })
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{EventKind, VirtualBackend};
    use std::sync::Arc;

    fn receiver(ports: &[&str]) -> (EventReceiver, VirtualBackend) {
        let backend = VirtualBackend::with_ports(ports.iter().copied());
        let catalog = DeviceCatalog::new(Arc::new(backend.clone()));
        (EventReceiver::new(catalog), backend)
    }

    #[test]
    fn test_open_default_uses_first_port() {
        let (mut rx, _) = receiver(&["Keys", "Pads"]);
        rx.open(DEFAULT_PORT, None).unwrap();
        assert_eq!(rx.endpoint(), Some("Keys"));
        assert_eq!(rx.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_open_no_devices() {
        let (mut rx, _) = receiver(&[]);
        assert!(matches!(rx.open(DEFAULT_PORT, None), Err(DeviceError::NoDevices)));
        assert_eq!(rx.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_open_missing_port_fails() {
        let (mut rx, _) = receiver(&["Keys"]);
        let err = rx.open("Piano", None).unwrap_err();
        match err {
            DeviceError::NotFound { name, available } => {
                assert_eq!(name, "Piano");
                assert_eq!(available, vec!["Keys".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_open_missing_port_uses_chooser() {
        let (mut rx, _) = receiver(&["Keys", "Pads"]);
        let chooser: &PortChooser = &|_: &str, available: &[String]| available.last().cloned();
        rx.open("Piano", Some(chooser)).unwrap();
        assert_eq!(rx.endpoint(), Some("Pads"));
    }

    #[test]
    fn test_chooser_cancel() {
        let (mut rx, _) = receiver(&["Keys"]);
        let chooser: &PortChooser = &|_: &str, _: &[String]| None;
        assert!(rx.open("Piano", Some(chooser)).is_err());
        assert!(!rx.is_open());
    }

    #[test]
    fn test_poll_stamps_delta_times() {
        let (mut rx, ports) = receiver(&["Keys"]);
        rx.open("Keys", None).unwrap();
        let start = rx.session().unwrap().started_at;

        ports.send_at("Keys", &[0x90, 60, 100], start + Duration::from_millis(120));
        ports.send_at("Keys", &[0x80, 60, 0], start + Duration::from_millis(370));
        ports.send_at("Keys", &[0xB0, 64, 127], start + Duration::from_micros(1_000_900));
        rx.poll();

        let events = rx.drain();
        let deltas: Vec<u32> = events.iter().map(|e| e.delta_ms()).collect();
        assert_eq!(deltas, vec![120, 250, 630]);
        assert!(!rx.has_events());
    }

    #[test]
    fn test_poll_skips_system_messages_without_advancing_clock() {
        let (mut rx, ports) = receiver(&["Keys"]);
        rx.open("Keys", None).unwrap();
        let start = rx.session().unwrap().started_at;

        ports.send_at("Keys", &[0x90, 60, 100], start + Duration::from_millis(10));
        ports.send_at("Keys", &[0xF8], start + Duration::from_millis(20));
        ports.send_at("Keys", &[0x90, 62, 100], start + Duration::from_millis(50));
        rx.poll();

        let events = rx.peek();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].delta_ms(), 40);
    }

    #[test]
    fn test_poll_applies_cable_workaround() {
        let (mut rx, ports) = receiver(&["Keys"]);
        rx.open("Keys", None).unwrap();

        ports.send("Keys", &[0x90, 60, 100]);
        ports.send("Keys", &[0x90, 60, 100]);
        ports.send("Keys", &[0x90, 60, 100]);
        rx.poll();

        let velocities: Vec<Option<u8>> = rx.peek().iter().map(|e| e.velocity()).collect();
        assert_eq!(velocities, vec![Some(100), Some(0), Some(100)]);
        assert!(rx.peek().iter().all(|e| e.kind() == EventKind::NoteOn));
    }

    #[test]
    fn test_new_events_flag() {
        let (mut rx, ports) = receiver(&["Keys"]);
        rx.open("Keys", None).unwrap();
        rx.poll();
        assert!(!rx.consume_new_events_flag());

        ports.send("Keys", &[0x90, 60, 100]);
        rx.poll();
        assert!(rx.consume_new_events_flag());
        assert!(!rx.consume_new_events_flag());
    }

    #[test]
    fn test_clear_keeps_timing() {
        let (mut rx, ports) = receiver(&["Keys"]);
        rx.open("Keys", None).unwrap();
        let start = rx.session().unwrap().started_at;

        ports.send_at("Keys", &[0x90, 60, 100], start + Duration::from_millis(100));
        rx.poll();
        rx.clear();
        assert_eq!(rx.count(), 0);

        ports.send_at("Keys", &[0x90, 62, 100], start + Duration::from_millis(180));
        rx.poll();
        assert_eq!(rx.peek()[0].delta_ms(), 80);
    }

    #[test]
    fn test_close_keeps_buffer_and_is_idempotent() {
        let (mut rx, ports) = receiver(&["Keys"]);
        rx.open("Keys", None).unwrap();
        ports.send("Keys", &[0x90, 60, 100]);
        rx.poll();

        rx.close();
        rx.close();
        assert!(!rx.is_open());
        assert_eq!(rx.count(), 1);
        assert_eq!(ports.connection_count("Keys"), 0);
        assert_eq!(rx.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reopen_keeps_buffer_and_clock() {
        let (mut rx, ports) = receiver(&["Keys", "Pads"]);
        rx.open("Keys", None).unwrap();
        let start = rx.session().unwrap().started_at;

        ports.send_at("Keys", &[0x90, 60, 100], start + Duration::from_millis(100));
        rx.poll();

        rx.reopen("Pads").unwrap();
        assert_eq!(rx.session().unwrap().started_at, start);

        ports.send_at("Pads", &[0x90, 64, 100], start + Duration::from_millis(400));
        rx.poll();

        let events = rx.peek();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].delta_ms(), 300);
    }

    #[test]
    fn test_health_detects_closed_connection() {
        let (mut rx, ports) = receiver(&["Keys"]);
        rx.open("Keys", None).unwrap();
        assert!(rx.check_health());

        ports.remove_port("Keys");
        assert!(!rx.check_health());
        assert_eq!(rx.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_health_is_throttled() {
        let (rx, ports) = receiver(&["Keys"]);
        let mut rx = rx.with_health_interval(Duration::from_secs(60));
        rx.open("Keys", None).unwrap();
        assert!(rx.check_health());

        // Enumeration failure hides the port, but the cached answer stands
        ports.set_enumeration_failure(true);
        assert!(rx.check_health());
    }

    #[test]
    fn test_health_rechecks_after_interval() {
        let (rx, ports) = receiver(&["Keys"]);
        let mut rx = rx.with_health_interval(Duration::ZERO);
        rx.open("Keys", None).unwrap();
        assert!(rx.check_health());

        ports.set_enumeration_failure(true);
        assert!(!rx.check_health());
    }

    #[test]
    fn test_health_without_session() {
        let (mut rx, _) = receiver(&["Keys"]);
        assert!(!rx.check_health());
    }

    #[test]
    fn test_session_clock_saturates() {
        let start = Instant::now();
        let mut clock = SessionClock::new(start + Duration::from_millis(50));
        assert_eq!(clock.stamp(start), 0);
        assert_eq!(clock.stamp(start + Duration::from_millis(80)), 30);
    }
}
