// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Recorder status widget.

use std::time::Duration;

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph, Widget},
};

use crate::midi::ConnectionState;
use crate::recording::{MonitorPhase, MonitorStatus};

/// Monitoring, connection, buffer and timer at a glance
pub struct StatusWidget<'a> {
    status: Option<&'a MonitorStatus>,
    block: Option<Block<'a>>,
}

impl<'a> StatusWidget<'a> {
    pub fn new(status: Option<&'a MonitorStatus>) -> Self {
        Self { status, block: None }
    }

    /// Set the block wrapper
    pub fn block(mut self, block: Block<'a>) -> Self {
        self.block = Some(block);
        self
    }
}

impl Widget for StatusWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let area = if let Some(block) = self.block {
            let inner = block.inner(area);
            block.render(area, buf);
            inner
        } else {
            area
        };

        let Some(status) = self.status else {
            Paragraph::new("Waiting for status...")
                .style(Style::default().fg(Color::DarkGray))
                .render(area, buf);
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(16), // Monitoring indicator
                Constraint::Min(0),     // Details
            ])
            .split(area);

        let (indicator, style) = phase_indicator(status);
        Paragraph::new(indicator).style(style).render(chunks[0], buf);

        let label = Style::default().fg(Color::DarkGray);
        let lines = vec![
            Line::from(vec![
                Span::styled("Port:       ", label),
                Span::styled(
                    status.port_name.as_deref().unwrap_or("-").to_string(),
                    Style::default().fg(Color::Cyan),
                ),
            ]),
            Line::from(vec![
                Span::styled("Connection: ", label),
                Span::styled(
                    connection_text(status),
                    connection_style(status.connection_state),
                ),
            ]),
            Line::from(vec![
                Span::styled("Buffered:   ", label),
                Span::styled(
                    format!("{} events", status.buffered_count),
                    Style::default().fg(Color::White),
                ),
            ]),
            Line::from(vec![
                Span::styled("Auto-save:  ", label),
                Span::styled(
                    timer_text(status.timer_armed, status.timer_remaining),
                    Style::default().fg(Color::Magenta),
                ),
            ]),
        ];
        Paragraph::new(lines).render(chunks[1], buf);
    }
}

fn phase_indicator(status: &MonitorStatus) -> (&'static str, Style) {
    match status.phase {
        MonitorPhase::Monitoring => (
            "● MONITORING",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        MonitorPhase::Stopped => ("■ STOPPED", Style::default().fg(Color::Yellow)),
        MonitorPhase::Idle => ("○ IDLE", Style::default().fg(Color::DarkGray)),
    }
}

fn connection_style(state: ConnectionState) -> Style {
    match state {
        ConnectionState::Connected => Style::default().fg(Color::Green),
        ConnectionState::Disconnected => Style::default().fg(Color::DarkGray),
        ConnectionState::Reconnecting => {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        }
        ConnectionState::Failed => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn connection_text(status: &MonitorStatus) -> String {
    match status.last_error {
        Some(ref e) => format!("{} ({})", status.connection_state, e),
        None => status.connection_state.to_string(),
    }
}

/// Timer line, e.g. `in 4:05`
pub(crate) fn timer_text(armed: bool, remaining: Option<Duration>) -> String {
    match (armed, remaining) {
        (true, Some(left)) => {
            let secs = left.as_secs();
            format!("in {}:{:02}", secs / 60, secs % 60)
        }
        (true, None) => "armed".to_string(),
        (false, _) => "off".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;

    #[test]
    fn test_timer_text() {
        assert_eq!(timer_text(false, None), "off");
        assert_eq!(timer_text(true, None), "armed");
        assert_eq!(timer_text(true, Some(Duration::from_secs(245))), "in 4:05");
        assert_eq!(timer_text(true, Some(Duration::from_millis(900))), "in 0:00");
    }

    #[test]
    fn test_connection_text_shows_device_error() {
        let mut status = MonitorStatus {
            monitoring: true,
            phase: MonitorPhase::Monitoring,
            connection_state: ConnectionState::Reconnecting,
            buffered_count: 0,
            timer_armed: true,
            timer_remaining: None,
            port_name: Some("Keys".to_string()),
            output_dir: None,
            manual_dir: None,
            last_error: Some(DeviceError::ConnectionLost("Keys".to_string())),
        };
        assert_eq!(connection_text(&status), "Reconnecting (connection to 'Keys' lost)");

        status.last_error = None;
        assert_eq!(connection_text(&status), "Reconnecting");
    }

    #[test]
    fn test_render_without_status() {
        let area = Rect::new(0, 0, 40, 4);
        let mut buf = Buffer::empty(area);
        StatusWidget::new(None).render(area, &mut buf);

        let first_row: String = (0..area.width)
            .map(|x| buf[(x, 0)].symbol().to_string())
            .collect();
        assert!(first_row.starts_with("Waiting for status"));
    }
}
