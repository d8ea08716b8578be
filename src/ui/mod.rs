// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Terminal UI for the recorder.
//!
//! Provides a ratatui-based terminal interface with the monitor status,
//! the save directories, a log of recent notices and an input picker.

mod status;

pub use status::StatusWidget;

use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame, Terminal,
};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::midi::PortInfo;
use crate::recording::{Monitor, MonitorSettings, MonitorStatus, StatusSink};

/// Notices kept for display
const MAX_NOTICES: usize = 50;

/// How long a status bar message stays up
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// UI state shared between the shell and the monitor's status sink
#[derive(Debug, Clone, Default)]
pub struct UiState {
    /// Latest monitor snapshot
    pub status: Option<MonitorStatus>,
    /// Recent notices, oldest first
    pub notices: VecDeque<Notice>,
    /// Help text visible
    pub show_help: bool,
    /// Status message
    pub status_message: Option<String>,
    /// Status message timestamp
    pub status_time: Option<Instant>,
    /// Input picker, while open
    pub picker: Option<DevicePicker>,
}

impl UiState {
    /// Append a notice, dropping the oldest past the limit
    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.notices.push_back(Notice {
            text: text.into(),
            time: Local::now(),
        });
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
    }

    /// Set a status message that will be displayed temporarily
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_time = Some(Instant::now());
    }

    /// Clear expired status message
    pub fn clear_expired_status(&mut self) {
        if let Some(time) = self.status_time {
            if time.elapsed() > STATUS_TIMEOUT {
                self.status_message = None;
                self.status_time = None;
            }
        }
    }
}

/// A monitor notice for display
#[derive(Debug, Clone)]
pub struct Notice {
    pub text: String,
    pub time: DateTime<Local>,
}

/// List of inputs to choose from
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePicker {
    ports: Vec<PortInfo>,
    current: Option<String>,
    selected: usize,
}

impl DevicePicker {
    /// Start with `current` highlighted when it is in the list
    pub fn new(ports: Vec<PortInfo>, current: Option<&str>) -> Self {
        let selected = current
            .and_then(|name| ports.iter().position(|p| p.name == name))
            .unwrap_or(0);
        Self {
            ports,
            current: current.map(str::to_string),
            selected,
        }
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    pub fn selected_port(&self) -> Option<&str> {
        self.ports.get(self.selected).map(|p| p.name.as_str())
    }

    pub fn next(&mut self) {
        if !self.ports.is_empty() {
            self.selected = (self.selected + 1) % self.ports.len();
        }
    }

    pub fn previous(&mut self) {
        if !self.ports.is_empty() {
            self.selected = (self.selected + self.ports.len() - 1) % self.ports.len();
        }
    }

    /// Handle a key while open. `Some` closes the picker with that action.
    pub fn handle_key(&mut self, code: KeyCode) -> Option<KeyAction> {
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.previous();
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.next();
                None
            }
            KeyCode::Enter => Some(
                self.selected_port()
                    .map(|name| KeyAction::ChooseDevice(name.to_string()))
                    .unwrap_or(KeyAction::None),
            ),
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('d') => Some(KeyAction::None),
            _ => None,
        }
    }
}

/// Status sink that feeds the notice log
pub fn notice_sink(state: &Arc<Mutex<UiState>>) -> StatusSink {
    let state = Arc::clone(state);
    Arc::new(move |message: &str| lock(&state).push_notice(message))
}

/// Key event result
#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
    /// No action needed
    None,
    /// Quit the application
    Quit,
    /// Start or stop monitoring
    ToggleMonitoring,
    /// Save to the manual directory
    ManualSave,
    /// Discard buffered events
    ClearBuffer,
    /// Open the input picker
    SelectDevice,
    /// Switch to the named input
    ChooseDevice(String),
    /// Toggle help
    ToggleHelp,
}

/// Map a key press to an action
pub fn key_action(code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
    match (code, modifiers) {
        (KeyCode::Char('q'), KeyModifiers::NONE)
        | (KeyCode::Char('c'), KeyModifiers::CONTROL) => KeyAction::Quit,
        (KeyCode::Char(' '), KeyModifiers::NONE) => KeyAction::ToggleMonitoring,
        (KeyCode::Char('m'), KeyModifiers::NONE) => KeyAction::ManualSave,
        (KeyCode::Char('c'), KeyModifiers::NONE) => KeyAction::ClearBuffer,
        (KeyCode::Char('d'), KeyModifiers::NONE) => KeyAction::SelectDevice,
        (KeyCode::Char('?'), _) | (KeyCode::Char('h'), KeyModifiers::NONE) => {
            KeyAction::ToggleHelp
        }
        _ => KeyAction::None,
    }
}

/// Terminal UI application
pub struct App {
    /// Shared UI state
    state: Arc<Mutex<UiState>>,
    /// Terminal handle
    terminal: Terminal<CrosstermBackend<Stdout>>,
    /// Whether to continue running
    running: bool,
}

impl App {
    /// Create a new app with shared state
    pub fn new(state: Arc<Mutex<UiState>>) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            state,
            terminal,
            running: true,
        })
    }

    /// Get shared state handle
    pub fn state(&self) -> Arc<Mutex<UiState>> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Handle a key event
    pub fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> KeyAction {
        {
            let mut state = lock(&self.state);
            if let Some(picker) = state.picker.as_mut() {
                if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
                    state.picker = None;
                } else {
                    let Some(action) = picker.handle_key(code) else {
                        return KeyAction::None;
                    };
                    state.picker = None;
                    return action;
                }
            }
        }

        let action = key_action(code, modifiers);
        match action {
            KeyAction::Quit => self.quit(),
            KeyAction::ToggleHelp => {
                let mut state = lock(&self.state);
                state.show_help = !state.show_help;
            }
            _ => {}
        }
        action
    }

    /// Poll for a key press, waiting at most `timeout`
    pub fn poll_event(&self, timeout: Duration) -> io::Result<Option<Event>> {
        if event::poll(timeout)? {
            Ok(Some(event::read()?))
        } else {
            Ok(None)
        }
    }

    /// Draw the UI
    pub fn draw(&mut self) -> io::Result<()> {
        let state = {
            let mut state = lock(&self.state);
            state.clear_expired_status();
            state.clone()
        };

        self.terminal.draw(|frame| {
            let area = frame.area();

            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(6), // Status
                    Constraint::Length(4), // Directories
                    Constraint::Min(5),    // Notices
                    Constraint::Length(1), // Status bar
                ])
                .split(area);

            frame.render_widget(
                StatusWidget::new(state.status.as_ref())
                    .block(Block::default().borders(Borders::ALL).title(" MIDI Recorder ")),
                chunks[0],
            );
            render_directories(frame, chunks[1], state.status.as_ref());
            render_notices(frame, chunks[2], &state.notices);
            render_status_bar(frame, chunks[3], &state);

            if let Some(ref picker) = state.picker {
                render_picker(frame, area, picker);
            } else if state.show_help {
                render_help_overlay(frame, area);
            }
        })?;

        Ok(())
    }

    fn cleanup(&mut self) -> io::Result<()> {
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Drive the monitor from the terminal until the user quits.
///
/// A port picked in the shell replaces `settings.port_name` and is written
/// back to the configuration at `config_path`.
pub fn run(
    app: &mut App,
    monitor: &Monitor,
    settings: &mut MonitorSettings,
    config: &mut AppConfig,
    config_path: &Path,
) -> Result<()> {
    let state = app.state();
    let tick = config.ui.tick_interval();

    while app.is_running() {
        monitor.tick();
        lock(&state).status = Some(monitor.status());
        app.draw()?;

        let Some(Event::Key(key)) = app.poll_event(tick)? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match app.handle_key(key.code, key.modifiers) {
            KeyAction::ToggleMonitoring => {
                if monitor.is_monitoring() {
                    let message = stop_monitoring(monitor);
                    lock(&state).set_status(message);
                } else if let Err(e) = monitor.start(settings.clone()) {
                    lock(&state).set_status(format!("Start failed: {e}"));
                }
            }
            KeyAction::ManualSave => {
                let message = match monitor.manual_save() {
                    Ok(Some(path)) => format!("Saved {}", path.display()),
                    Ok(None) => "Nothing to save".to_string(),
                    Err(e) => format!("Save failed: {e}"),
                };
                lock(&state).set_status(message);
            }
            KeyAction::ClearBuffer => {
                let cleared = monitor.clear_buffer();
                lock(&state).set_status(format!("Cleared {cleared} events"));
            }
            KeyAction::SelectDevice => {
                let ports = monitor.catalog().describe();
                let current = monitor.status().port_name;
                let mut state = lock(&state);
                if ports.is_empty() {
                    state.set_status("No MIDI inputs found");
                } else {
                    state.picker = Some(DevicePicker::new(ports, current.as_deref()));
                }
            }
            KeyAction::ChooseDevice(port) => {
                let message = match switch_device(monitor, settings, config, config_path, &port) {
                    Ok(message) => message,
                    Err(e) => format!("Device change failed: {e:#}"),
                };
                lock(&state).set_status(message);
            }
            KeyAction::Quit => {
                shutdown(monitor);
            }
            KeyAction::ToggleHelp | KeyAction::None => {}
        }
    }

    Ok(())
}

/// Save buffered events, then stop. Returns a line for the status bar.
pub fn stop_monitoring(monitor: &Monitor) -> String {
    let message = match monitor.flush() {
        Ok(Some(path)) => format!("Stopped, saved {}", path.display()),
        Ok(None) => "Stopped".to_string(),
        Err(e) => format!("Stopped, final save failed: {e}"),
    };
    monitor.stop();
    message
}

/// Use `port` from now on.
///
/// The choice is saved to the configuration. A running monitor is flushed
/// and restarted on the new port; otherwise the port is only test-opened.
pub fn switch_device(
    monitor: &Monitor,
    settings: &mut MonitorSettings,
    config: &mut AppConfig,
    config_path: &Path,
    port: &str,
) -> Result<String> {
    config.set_port_name(port);
    config.save(config_path)?;
    settings.port_name = port.to_string();
    info!(port, "MIDI input selected");

    if monitor.is_monitoring() {
        stop_monitoring(monitor);
        monitor.start(settings.clone())?;
        return Ok(format!("Monitoring '{port}'"));
    }

    if monitor.catalog().test_connection(port) {
        Ok(format!("Selected '{port}', connection test passed"))
    } else {
        warn!(port, "Selected MIDI input did not open");
        Ok(format!("Selected '{port}', connection test failed"))
    }
}

/// Flush whatever is still buffered and stop before leaving
pub fn shutdown(monitor: &Monitor) {
    if monitor.status().buffered_count > 0 {
        match monitor.flush() {
            Ok(Some(path)) => info!(path = %path.display(), "Flushed buffer on exit"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Final save on exit failed"),
        }
    }
    monitor.stop();
}

fn lock(state: &Mutex<UiState>) -> MutexGuard<'_, UiState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Render save directories
fn render_directories(frame: &mut Frame, area: Rect, status: Option<&MonitorStatus>) {
    let block = Block::default().borders(Borders::ALL).title(" Directories ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let show = |dir: Option<&std::path::PathBuf>| {
        dir.map(|d| d.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    let label = Style::default().fg(Color::DarkGray);
    let lines = vec![
        Line::from(vec![
            Span::styled("Auto:   ", label),
            Span::raw(show(status.and_then(|s| s.output_dir.as_ref()))),
        ]),
        Line::from(vec![
            Span::styled("Manual: ", label),
            Span::raw(show(status.and_then(|s| s.manual_dir.as_ref()))),
        ]),
    ];
    frame.render_widget(Paragraph::new(lines), inner);
}

/// Render the notice log, newest at the bottom
fn render_notices(frame: &mut Frame, area: Rect, notices: &VecDeque<Notice>) {
    let block = Block::default().borders(Borders::ALL).title(" Log ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let visible = inner.height as usize;
    let lines: Vec<Line> = notices
        .iter()
        .skip(notices.len().saturating_sub(visible))
        .map(|notice| {
            Line::from(vec![
                Span::styled(
                    notice.time.format("%H:%M:%S ").to_string(),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::raw(notice.text.clone()),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), inner);
}

/// Render status bar
fn render_status_bar(frame: &mut Frame, area: Rect, state: &UiState) {
    let text = if let Some(ref msg) = state.status_message {
        Span::styled(msg, Style::default().fg(Color::Yellow))
    } else {
        Span::styled(
            " Space: Start/Stop | m: Manual save | c: Clear | d: Device | h: Help | q: Quit",
            Style::default().fg(Color::DarkGray),
        )
    };

    frame.render_widget(Paragraph::new(text), area);
}

/// Render help overlay
fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let width = 46.min(area.width.saturating_sub(4));
    let height = 12.min(area.height.saturating_sub(4));
    let x = (area.width - width) / 2;
    let y = (area.height - height) / 2;
    let help_area = Rect::new(x, y, width, height);

    frame.render_widget(Clear, help_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Help ")
        .style(Style::default().bg(Color::Black));

    let inner = block.inner(help_area);
    frame.render_widget(block, help_area);

    let help_text = vec![
        Line::from(Span::styled("Recording", Style::default().add_modifier(Modifier::BOLD))),
        Line::from("  Space       Start/stop monitoring"),
        Line::from("  m           Manual save"),
        Line::from("  c           Clear buffered events"),
        Line::from("  d           Select MIDI input"),
        Line::from(""),
        Line::from(Span::styled("Other", Style::default().add_modifier(Modifier::BOLD))),
        Line::from("  h/?         Toggle help"),
        Line::from("  q/Ctrl+c    Quit (saves buffered events)"),
    ];

    frame.render_widget(Paragraph::new(help_text), inner);
}

/// Render the input picker
fn render_picker(frame: &mut Frame, area: Rect, picker: &DevicePicker) {
    let width = 50.min(area.width.saturating_sub(4));
    let height = (picker.ports().len() as u16 + 4).min(area.height.saturating_sub(2));
    let picker_area = Rect::new(
        (area.width - width) / 2,
        (area.height - height) / 2,
        width,
        height,
    );

    frame.render_widget(Clear, picker_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Select MIDI Input ")
        .style(Style::default().bg(Color::Black));
    let inner = block.inner(picker_area);
    frame.render_widget(block, picker_area);

    let mut lines: Vec<Line> = picker
        .ports()
        .iter()
        .enumerate()
        .map(|(i, port)| {
            let marker = if i == picker.selected { "> " } else { "  " };
            let current = picker.current.as_deref() == Some(port.name.as_str());
            let mut style = Style::default();
            if i == picker.selected {
                style = style.fg(Color::Cyan).add_modifier(Modifier::BOLD);
            }
            let mut spans = vec![Span::styled(
                format!("{}{}: {}", marker, port.index + 1, port.name),
                style,
            )];
            if current {
                spans.push(Span::styled(" (current)", Style::default().fg(Color::Green)));
            }
            Line::from(spans)
        })
        .collect();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Up/Down: move | Enter: select | Esc: cancel",
        Style::default().fg(Color::DarkGray),
    )));

    frame.render_widget(Paragraph::new(lines), inner);
}
