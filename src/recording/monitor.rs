// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Recording orchestrator.
//!
//! The monitor ties the receiver, the auto-save timer and the file writer
//! together. The shell drives it by calling [`Monitor::tick`] on a steady
//! cadence; the timer fires on its own thread. Both paths meet at the
//! receiver mutex, which guards the event buffer and connection state.
//!
//! Lock order is run state, then receiver. The timer is never disarmed while
//! either lock is held, since `disarm` waits for an in-flight auto-save.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{DeviceError, FileError, MonitorError};
use crate::midi::{
    ConnectionState, DeviceCatalog, EventReceiver, PortChooser, Transport, DEFAULT_PORT,
};
use crate::timing::AutoSaveTimer;

use super::writer::FileWriter;

/// Receives human-readable progress and error notices
pub type StatusSink = Arc<dyn Fn(&str) + Send + Sync>;

/// What to record and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Input endpoint name, or `"default"` for the first one
    pub port_name: String,
    pub output_dir: PathBuf,
    pub manual_dir: PathBuf,
    /// Inactivity period before an auto-save
    pub timeout: Duration,
}

impl MonitorSettings {
    pub fn new(
        port_name: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        manual_dir: impl Into<PathBuf>,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            port_name: port_name.into(),
            output_dir: output_dir.into(),
            manual_dir: manual_dir.into(),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Record from the first available port
    pub fn default_port(output_dir: impl Into<PathBuf>, timeout_seconds: u64) -> Self {
        let output_dir = output_dir.into();
        Self::new(DEFAULT_PORT, output_dir.clone(), output_dir, timeout_seconds)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Disconnect detection and recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Minimum spacing between catalog health checks
    pub health_check_interval: Duration,
    /// Consecutive failed health checks before reconnecting
    pub max_health_failures: u32,
    /// How long to wait for the original port to return
    pub reconnect_wait: Duration,
    /// Catalog poll spacing while waiting
    pub reconnect_poll: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(5),
            max_health_failures: 3,
            reconnect_wait: Duration::from_secs(30),
            reconnect_poll: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Monitoring,
    Stopped,
}

/// Point-in-time snapshot for the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    pub monitoring: bool,
    pub phase: MonitorPhase,
    pub connection_state: ConnectionState,
    pub buffered_count: usize,
    pub timer_armed: bool,
    pub timer_remaining: Option<Duration>,
    /// Endpoint in use, or the requested name when no session is open
    pub port_name: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub manual_dir: Option<PathBuf>,
    /// Most recent device failure of this run, cleared on recovery
    pub last_error: Option<DeviceError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReconnectOutcome {
    Found(String),
    Exhausted,
}

#[derive(Clone, Copy)]
enum Severity {
    Info,
    Warn,
    Error,
}

struct RunState {
    phase: MonitorPhase,
    settings: Option<MonitorSettings>,
    writer: Option<FileWriter>,
    health_failures: u32,
    reconnect: Option<Pending>,
    last_error: Option<DeviceError>,
}

struct Pending {
    original: String,
    outcome: Receiver<ReconnectOutcome>,
}

struct Inner {
    catalog: DeviceCatalog,
    options: MonitorOptions,
    run: Mutex<RunState>,
    receiver: Mutex<EventReceiver>,
    timer: AutoSaveTimer,
    monitoring: AtomicBool,
    sink: Mutex<Option<StatusSink>>,
    chooser: Mutex<Option<Arc<PortChooser>>>,
}

/// Captures MIDI input and saves it after inactivity or on request
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(transport: Transport, options: MonitorOptions) -> Self {
        let catalog = DeviceCatalog::new(transport.into_backend());
        let receiver =
            EventReceiver::new(catalog.clone()).with_health_interval(options.health_check_interval);

        Self {
            inner: Arc::new(Inner {
                catalog,
                options,
                run: Mutex::new(RunState {
                    phase: MonitorPhase::Idle,
                    settings: None,
                    writer: None,
                    health_failures: 0,
                    reconnect: None,
                    last_error: None,
                }),
                receiver: Mutex::new(receiver),
                timer: AutoSaveTimer::new(),
                monitoring: AtomicBool::new(false),
                sink: Mutex::new(None),
                chooser: Mutex::new(None),
            }),
        }
    }

    /// Send notices to `sink` as well as the log
    pub fn with_status_sink(self, sink: StatusSink) -> Self {
        *lock(&self.inner.sink) = Some(sink);
        self
    }

    /// Ask `chooser` for a replacement when the requested port is missing at start
    pub fn with_port_chooser(self, chooser: Arc<PortChooser>) -> Self {
        *lock(&self.inner.chooser) = Some(chooser);
        self
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.inner.catalog
    }

    pub fn options(&self) -> MonitorOptions {
        self.inner.options
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    /// Open the port and begin a monitoring run.
    ///
    /// Events left over from a previous run are written to the new output
    /// directory first; if that fails the run does not start.
    pub fn start(&self, settings: MonitorSettings) -> Result<(), MonitorError> {
        let inner = &self.inner;
        let mut run = lock(&inner.run);
        if run.phase == MonitorPhase::Monitoring {
            return Err(MonitorError::AlreadyMonitoring);
        }

        let writer = FileWriter::new(&settings.output_dir, &settings.manual_dir);
        {
            let mut receiver = lock(&inner.receiver);
            if receiver.has_events() {
                let path = writer.write_auto(&receiver.peek())?;
                receiver.clear();
                inner.notify(
                    Severity::Info,
                    &format!("Saved events from previous run to {}", path.display()),
                );
            }

            let chooser = lock(&inner.chooser).clone();
            if let Err(e) = receiver.open(&settings.port_name, chooser.as_deref()) {
                inner.notify(Severity::Error, &format!("Cannot start monitoring: {e}"));
                return Err(e.into());
            }
        }

        inner.monitoring.store(true, Ordering::SeqCst);
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let armed = inner.timer.arm(settings.timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.auto_save();
            }
        });
        if let Err(e) = armed {
            inner.monitoring.store(false, Ordering::SeqCst);
            lock(&inner.receiver).close();
            return Err(e.into());
        }

        let port = lock(&inner.receiver)
            .endpoint()
            .unwrap_or(settings.port_name.as_str())
            .to_string();
        inner.notify(
            Severity::Info,
            &format!(
                "Monitoring '{}' (auto-save after {}s of inactivity)",
                port,
                settings.timeout.as_secs()
            ),
        );

        run.phase = MonitorPhase::Monitoring;
        run.writer = Some(writer);
        run.settings = Some(settings);
        run.health_failures = 0;
        run.reconnect = None;
        run.last_error = None;
        Ok(())
    }

    /// Service the input once; never blocks on device recovery
    pub fn tick(&self) {
        if !self.is_monitoring() {
            return;
        }

        let terminal = {
            let mut run = lock(&self.inner.run);
            if run.phase != MonitorPhase::Monitoring {
                return;
            }
            if run.reconnect.is_some() {
                self.inner.collect_reconnect(&mut run)
            } else {
                self.inner.service(&mut run);
                false
            }
        };

        if terminal {
            self.halt(Some(ConnectionState::Failed));
        }
    }

    /// Save to the manual directory.
    ///
    /// With an empty buffer the newest auto-save is copied (`None` when there
    /// is none). Otherwise the buffer is auto-saved, cleared, and the new file
    /// copied; if the copy fails the auto-save path is returned instead.
    pub fn manual_save(&self) -> Result<Option<PathBuf>, FileError> {
        let inner = &self.inner;
        let run = lock(&inner.run);
        let Some(writer) = run.writer.clone() else {
            inner.notify(Severity::Warn, "Nothing to save: monitoring has not been started");
            return Ok(None);
        };

        let result = inner.save_to_manual(&writer);
        if inner.monitoring.load(Ordering::SeqCst) {
            inner.timer.rearm();
        }
        result
    }

    /// Write any buffered events to the auto-save directory now
    pub fn flush(&self) -> Result<Option<PathBuf>, FileError> {
        let inner = &self.inner;
        let run = lock(&inner.run);
        let Some(writer) = run.writer.as_ref() else {
            return Ok(None);
        };
        let mut receiver = lock(&inner.receiver);
        inner.flush_buffer(writer, &mut receiver)
    }

    /// Discard buffered events without saving
    pub fn clear_buffer(&self) -> usize {
        let mut receiver = lock(&self.inner.receiver);
        let dropped = receiver.count();
        receiver.clear();
        drop(receiver);

        if dropped > 0 {
            self.inner
                .notify(Severity::Info, &format!("Cleared {dropped} buffered events"));
        }
        dropped
    }

    /// End the run. Buffered events stay in memory.
    pub fn stop(&self) {
        self.halt(None);
    }

    fn halt(&self, final_state: Option<ConnectionState>) {
        let inner = &self.inner;
        inner.monitoring.store(false, Ordering::SeqCst);
        inner.timer.disarm();

        let mut run = lock(&inner.run);
        if run.phase != MonitorPhase::Monitoring {
            return;
        }
        run.phase = MonitorPhase::Stopped;
        run.reconnect = None;
        run.health_failures = 0;

        let failure = run.last_error.clone();

        let mut receiver = lock(&inner.receiver);
        receiver.close();
        if let Some(state) = final_state {
            receiver.set_state(state);
        }
        let buffered = receiver.count();
        drop(receiver);
        drop(run);

        match (final_state, failure) {
            (Some(ConnectionState::Failed), Some(e)) => {
                inner.notify(Severity::Error, &format!("Monitoring stopped: {e}"))
            }
            (Some(ConnectionState::Failed), None) => {
                inner.notify(Severity::Error, "Monitoring stopped: MIDI device failed")
            }
            _ if buffered > 0 => inner.notify(
                Severity::Info,
                &format!("Monitoring stopped ({buffered} events still buffered)"),
            ),
            _ => inner.notify(Severity::Info, "Monitoring stopped"),
        }
    }

    pub fn status(&self) -> MonitorStatus {
        let inner = &self.inner;
        let run = lock(&inner.run);
        let receiver = lock(&inner.receiver);
        let settings = run.settings.as_ref();

        MonitorStatus {
            monitoring: inner.monitoring.load(Ordering::SeqCst),
            phase: run.phase,
            connection_state: receiver.state(),
            buffered_count: receiver.count(),
            timer_armed: inner.timer.is_armed(),
            timer_remaining: inner.timer.remaining(),
            port_name: receiver
                .endpoint()
                .map(str::to_string)
                .or_else(|| settings.map(|s| s.port_name.clone())),
            output_dir: settings.map(|s| s.output_dir.clone()),
            manual_dir: settings.map(|s| s.manual_dir.clone()),
            last_error: run.last_error.clone(),
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.inner.monitoring.store(false, Ordering::SeqCst);
        self.inner.timer.disarm();
    }
}

impl Inner {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warn => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
        let sink = lock(&self.sink).clone();
        if let Some(sink) = sink {
            sink(message);
        }
    }

    /// Timer callback: save a non-empty buffer, then keep the timer going
    fn auto_save(&self) {
        if !self.monitoring.load(Ordering::SeqCst) {
            return;
        }

        let writer = lock(&self.run).writer.clone();
        if let Some(writer) = writer {
            let mut receiver = lock(&self.receiver);
            // Failures keep the buffer for the next fire
            let _ = self.flush_buffer(&writer, &mut receiver);
        }

        if self.monitoring.load(Ordering::SeqCst) {
            self.timer.rearm();
        }
    }

    fn flush_buffer(
        &self,
        writer: &FileWriter,
        receiver: &mut EventReceiver,
    ) -> Result<Option<PathBuf>, FileError> {
        if !receiver.has_events() {
            return Ok(None);
        }

        let events = receiver.peek();
        match writer.write_auto(&events) {
            Ok(path) => {
                receiver.clear();
                self.notify(
                    Severity::Info,
                    &format!("Auto-saved {} events to {}", events.len(), path.display()),
                );
                Ok(Some(path))
            }
            Err(e) => {
                self.notify(Severity::Error, &format!("Auto-save failed: {e}"));
                Err(e)
            }
        }
    }

    fn save_to_manual(&self, writer: &FileWriter) -> Result<Option<PathBuf>, FileError> {
        let mut receiver = lock(&self.receiver);
        if !receiver.has_events() {
            drop(receiver);
            return match writer.copy_latest_auto_save_to_manual() {
                Ok(Some(path)) => {
                    self.notify(
                        Severity::Info,
                        &format!("Copied latest auto-save to {}", path.display()),
                    );
                    Ok(Some(path))
                }
                Ok(None) => {
                    self.notify(Severity::Info, "No recordings to save yet");
                    Ok(None)
                }
                Err(e) => {
                    self.notify(Severity::Error, &format!("Manual save failed: {e}"));
                    Err(e)
                }
            };
        }

        let Some(auto) = self.flush_buffer(writer, &mut receiver)? else {
            return Ok(None);
        };
        drop(receiver);

        match writer.copy_to_manual(&auto) {
            Ok(path) => {
                self.notify(Severity::Info, &format!("Manual save: {}", path.display()));
                Ok(Some(path))
            }
            Err(e) => {
                self.notify(
                    Severity::Warn,
                    &format!("Copy to manual saves failed ({e}); recording kept at {}", auto.display()),
                );
                Ok(Some(auto))
            }
        }
    }

    /// Poll, check health and rearm on activity
    fn service(&self, run: &mut RunState) {
        let mut receiver = lock(&self.receiver);
        receiver.poll();

        if receiver.check_health() {
            run.health_failures = 0;
        } else {
            run.health_failures += 1;
            warn!(
                failures = run.health_failures,
                limit = self.options.max_health_failures,
                "MIDI health check failed"
            );
            if run.health_failures >= self.options.max_health_failures {
                self.begin_reconnect(run, &mut receiver);
                return;
            }
        }

        if receiver.consume_new_events_flag() {
            self.timer.rearm();
        }
    }

    /// Flush what we have, then look for the device off the tick path
    fn begin_reconnect(&self, run: &mut RunState, receiver: &mut EventReceiver) {
        receiver.set_state(ConnectionState::Reconnecting);
        run.health_failures = 0;

        let original = receiver
            .endpoint()
            .map(str::to_string)
            .or_else(|| run.settings.as_ref().map(|s| s.port_name.clone()))
            .unwrap_or_else(|| DEFAULT_PORT.to_string());
        let lost = DeviceError::ConnectionLost(original.clone());
        self.notify(Severity::Warn, &format!("{lost}, attempting to reconnect"));
        run.last_error = Some(lost);

        if let Some(writer) = run.writer.as_ref() {
            // Best effort; recovery goes ahead regardless
            let _ = self.flush_buffer(writer, receiver);
        }

        let (tx, rx) = mpsc::channel();
        let catalog = self.catalog.clone();
        let options = self.options;
        let name = original.clone();
        thread::spawn(move || {
            let returned =
                catalog.wait_for_reconnect(&name, options.reconnect_wait, options.reconnect_poll);
            let outcome = if returned {
                ReconnectOutcome::Found(name)
            } else {
                match catalog.find_alternative(&name) {
                    Some(alternative) => ReconnectOutcome::Found(alternative),
                    None => ReconnectOutcome::Exhausted,
                }
            };
            let _ = tx.send(outcome);
        });

        run.reconnect = Some(Pending {
            original,
            outcome: rx,
        });
    }

    /// Apply a finished reconnect attempt. Returns true when the run must end.
    fn collect_reconnect(&self, run: &mut RunState) -> bool {
        let Some(pending) = run.reconnect.as_ref() else {
            return false;
        };
        let outcome = match pending.outcome.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => ReconnectOutcome::Exhausted,
        };
        let original = pending.original.clone();
        run.reconnect = None;

        let ReconnectOutcome::Found(name) = outcome else {
            let failed = DeviceError::Failed(format!(
                "'{original}' did not return and no other MIDI input is available"
            ));
            self.notify(Severity::Error, &failed.to_string());
            run.last_error = Some(failed);
            return true;
        };

        let mut receiver = lock(&self.receiver);
        match receiver.reopen(&name) {
            Ok(()) => {
                drop(receiver);
                run.last_error = None;
                if name == original {
                    self.notify(Severity::Info, &format!("Reconnected to '{name}'"));
                } else {
                    self.notify(
                        Severity::Warn,
                        &format!("'{original}' unavailable, switched to '{name}'"),
                    );
                }
                self.timer.rearm();
                false
            }
            Err(e) => {
                drop(receiver);
                let failed = DeviceError::Failed(format!("reconnect to '{name}' failed: {e}"));
                self.notify(Severity::Error, &failed.to_string());
                run.last_error = Some(failed);
                true
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::VirtualBackend;
    use tempfile::TempDir;

    fn fast_options() -> MonitorOptions {
        MonitorOptions {
            health_check_interval: Duration::ZERO,
            max_health_failures: 3,
            reconnect_wait: Duration::from_millis(200),
            reconnect_poll: Duration::from_millis(10),
        }
    }

    fn setup(ports: &[&str]) -> (Monitor, VirtualBackend, TempDir) {
        let backend = VirtualBackend::with_ports(ports.iter().copied());
        let monitor = Monitor::new(Transport::Virtual(backend.clone()), fast_options());
        (monitor, backend, TempDir::new().unwrap())
    }

    fn settings(dir: &TempDir, port: &str) -> MonitorSettings {
        MonitorSettings::new(port, dir.path().join("auto"), dir.path().join("manual"), 60)
    }

    fn wait_for(monitor: &Monitor, mut done: impl FnMut(&MonitorStatus) -> bool) -> MonitorStatus {
        for _ in 0..200 {
            monitor.tick();
            let status = monitor.status();
            if done(&status) {
                return status;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached: {:?}", monitor.status());
    }

    #[test]
    fn test_initial_status() {
        let (monitor, _, _) = setup(&["Keys"]);
        let status = monitor.status();
        assert!(!status.monitoring);
        assert_eq!(status.phase, MonitorPhase::Idle);
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert!(!status.timer_armed);
        assert_eq!(status.port_name, None);
    }

    #[test]
    fn test_start_and_stop() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        monitor.start(settings(&dir, DEFAULT_PORT)).unwrap();

        let status = monitor.status();
        assert!(status.monitoring);
        assert_eq!(status.phase, MonitorPhase::Monitoring);
        assert_eq!(status.connection_state, ConnectionState::Connected);
        assert_eq!(status.port_name.as_deref(), Some("Keys"));
        assert!(status.timer_armed);

        ports.send("Keys", &[0x90, 60, 100]);
        monitor.tick();
        monitor.stop();

        let status = monitor.status();
        assert!(!status.monitoring);
        assert_eq!(status.phase, MonitorPhase::Stopped);
        assert!(!status.timer_armed);
        assert_eq!(status.buffered_count, 1);
        assert_eq!(ports.connection_count("Keys"), 0);
    }

    #[test]
    fn test_start_twice_fails() {
        let (monitor, _, dir) = setup(&["Keys"]);
        monitor.start(settings(&dir, "Keys")).unwrap();
        assert!(matches!(
            monitor.start(settings(&dir, "Keys")),
            Err(MonitorError::AlreadyMonitoring)
        ));
    }

    #[test]
    fn test_start_missing_port_fails() {
        let (monitor, _, dir) = setup(&["Keys"]);
        let err = monitor.start(settings(&dir, "Piano")).unwrap_err();
        assert!(matches!(err, MonitorError::Device(_)));
        assert!(!monitor.is_monitoring());
        assert!(!monitor.status().timer_armed);
    }

    #[test]
    fn test_start_uses_port_chooser() {
        let (monitor, _, dir) = setup(&["Keys", "Pads"]);
        let chooser: Arc<PortChooser> = Arc::new(|_: &str, available: &[String]| available.get(1).cloned());
        let monitor = monitor.with_port_chooser(chooser);
        monitor.start(settings(&dir, "Piano")).unwrap();
        assert_eq!(monitor.status().port_name.as_deref(), Some("Pads"));
    }

    #[test]
    fn test_restart_flushes_leftover_events() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        monitor.start(settings(&dir, "Keys")).unwrap();
        ports.send("Keys", &[0x90, 60, 100]);
        monitor.tick();
        monitor.stop();

        monitor.start(settings(&dir, "Keys")).unwrap();
        assert_eq!(monitor.status().buffered_count, 0);
        let writer = FileWriter::new(dir.path().join("auto"), dir.path().join("manual"));
        assert_eq!(writer.list_saved(writer.output_dir()).unwrap().len(), 1);
    }

    #[test]
    fn test_tick_rearms_on_new_events() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        monitor.start(settings(&dir, "Keys").with_timeout(Duration::from_millis(300))).unwrap();

        thread::sleep(Duration::from_millis(150));
        ports.send("Keys", &[0x90, 60, 100]);
        monitor.tick();

        let remaining = monitor.status().timer_remaining.unwrap();
        assert!(remaining > Duration::from_millis(200), "remaining {remaining:?}");
    }

    #[test]
    fn test_auto_save_on_timeout() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        monitor.start(settings(&dir, "Keys").with_timeout(Duration::from_millis(100))).unwrap();

        ports.send("Keys", &[0x90, 60, 100]);
        ports.send("Keys", &[0x90, 60, 100]);
        monitor.tick();
        assert_eq!(monitor.status().buffered_count, 2);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(monitor.status().buffered_count, 0);
        assert!(monitor.is_monitoring());

        let writer = FileWriter::new(dir.path().join("auto"), dir.path().join("manual"));
        assert_eq!(writer.list_saved(writer.output_dir()).unwrap().len(), 1);
    }

    #[test]
    fn test_auto_save_failure_keeps_buffer() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let settings = MonitorSettings::new("Keys", &blocker, dir.path(), 60)
            .with_timeout(Duration::from_millis(50));
        monitor.start(settings).unwrap();

        ports.send("Keys", &[0x90, 60, 100]);
        monitor.tick();
        thread::sleep(Duration::from_millis(200));

        // Retried on every fire, never cleared
        assert_eq!(monitor.status().buffered_count, 1);
        assert!(monitor.is_monitoring());
    }

    #[test]
    fn test_manual_save_before_start() {
        let (monitor, _, _) = setup(&["Keys"]);
        assert_eq!(monitor.manual_save().unwrap(), None);
    }

    #[test]
    fn test_manual_save_copy_failure_falls_back_to_auto_save() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        monitor
            .start(MonitorSettings::new("Keys", dir.path().join("auto"), &blocker, 60))
            .unwrap();

        ports.send("Keys", &[0x90, 60, 100]);
        monitor.tick();
        let path = monitor.manual_save().unwrap().unwrap();

        assert_eq!(path.parent(), Some(dir.path().join("auto").as_path()));
        let status = monitor.status();
        assert_eq!(status.buffered_count, 0);
        assert!(status.timer_armed);
    }

    #[test]
    fn test_clear_buffer() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        monitor.start(settings(&dir, "Keys")).unwrap();
        ports.send("Keys", &[0x90, 60, 100]);
        ports.send("Keys", &[0xB0, 64, 0]);
        monitor.tick();

        assert_eq!(monitor.clear_buffer(), 2);
        assert_eq!(monitor.status().buffered_count, 0);
    }

    #[test]
    fn test_flush() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        assert_eq!(monitor.flush().unwrap(), None);

        monitor.start(settings(&dir, "Keys")).unwrap();
        ports.send("Keys", &[0x90, 60, 100]);
        monitor.tick();

        let path = monitor.flush().unwrap().unwrap();
        assert!(path.starts_with(dir.path().join("auto")));
        assert_eq!(monitor.flush().unwrap(), None);
    }

    #[test]
    fn test_reconnect_to_alternative() {
        let (monitor, ports, dir) = setup(&["Keys", "Pads"]);
        monitor.start(settings(&dir, "Keys")).unwrap();

        ports.remove_port("Keys");
        for _ in 0..3 {
            monitor.tick();
        }
        let status = monitor.status();
        assert_eq!(status.connection_state, ConnectionState::Reconnecting);
        assert_eq!(
            status.last_error,
            Some(DeviceError::ConnectionLost("Keys".to_string()))
        );

        let status = wait_for(&monitor, |s| s.connection_state == ConnectionState::Connected);
        assert_eq!(status.port_name.as_deref(), Some("Pads"));
        assert!(status.monitoring);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_reconnect_exhausted_fails_and_stops() {
        let (monitor, ports, dir) = setup(&["Keys"]);
        monitor.start(settings(&dir, "Keys")).unwrap();

        ports.remove_port("Keys");
        let status = wait_for(&monitor, |s| s.connection_state == ConnectionState::Failed);
        assert!(!status.monitoring);
        assert_eq!(status.phase, MonitorPhase::Stopped);
        assert!(!status.timer_armed);
        assert!(matches!(status.last_error, Some(DeviceError::Failed(_))));

        // A fresh run starts without the old failure
        ports.add_port("Keys");
        monitor.start(settings(&dir, "Keys")).unwrap();
        assert_eq!(monitor.status().last_error, None);
    }

    #[test]
    fn test_status_sink_receives_notices() {
        let (monitor, _, dir) = setup(&["Keys"]);
        let notices = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&notices);
        let monitor = monitor.with_status_sink(Arc::new(move |msg: &str| {
            seen.lock().unwrap().push(msg.to_string());
        }));

        monitor.start(settings(&dir, "Keys")).unwrap();
        monitor.stop();

        let notices = notices.lock().unwrap();
        assert!(notices.iter().any(|n| n.contains("Monitoring 'Keys'")));
        assert!(notices.iter().any(|n| n == "Monitoring stopped"));
    }
}
