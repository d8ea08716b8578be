// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Configuration system for the recorder.
//!
//! This module provides the YAML configuration file: which MIDI input to
//! record, where files go, reconnection policy, terminal refresh rate and
//! logging.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::midi::{Transport, VirtualBackend, DEFAULT_PORT};
use crate::recording::{MonitorOptions, MonitorSettings};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Port offered by the virtual transport
pub const VIRTUAL_PORT_NAME: &str = "Virtual Input";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load a configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&contents)
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        config.save(path)?;
        info!(path = ?path, "Created default configuration file");
        Ok(config)
    }

    /// Parse a configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Serialize to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")
    }

    /// Save configuration to a YAML file, creating its directory
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let yaml = self.to_yaml()?;
        fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))
    }

    /// Record `port` as the input to use
    pub fn set_port_name(&mut self, port: impl Into<String>) {
        self.midi.port_name = port.into();
    }

    /// Create the output, manual-save and log directories
    pub fn ensure_directories(&self) -> Result<()> {
        let mut dirs = vec![self.output.directory.clone(), self.output.manual_dir()];
        if let Some(parent) = self.logging.file.parent().filter(|p| !p.as_os_str().is_empty()) {
            dirs.push(parent.to_path_buf());
        }
        for dir in dirs {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
        Ok(())
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings::new(
            self.midi.port_name.clone(),
            self.output.directory.clone(),
            self.output.manual_dir(),
            self.midi.timeout_seconds,
        )
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        self.reconnect.to_options()
    }

    pub fn transport(&self) -> Transport {
        self.midi.transport.build()
    }
}

/// MIDI input settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MidiConfig {
    /// Input port name; `default` selects the first available port
    #[serde(default = "default_port_name")]
    pub port_name: String,
    /// Seconds of inactivity before an auto-save
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub transport: TransportKind,
}

fn default_port_name() -> String {
    DEFAULT_PORT.to_string()
}

fn default_timeout_seconds() -> u64 {
    300
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            port_name: default_port_name(),
            timeout_seconds: default_timeout_seconds(),
            transport: TransportKind::default(),
        }
    }
}

/// Which MIDI transport to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Platform MIDI
    #[default]
    Native,
    /// One in-process port, for running without hardware
    Virtual,
}

impl TransportKind {
    pub fn build(self) -> Transport {
        match self {
            TransportKind::Native => Transport::native(),
            TransportKind::Virtual => {
                Transport::Virtual(VirtualBackend::with_ports([VIRTUAL_PORT_NAME]))
            }
        }
    }
}

/// Where recordings go
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Auto-save directory
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    /// Manual-save directory; the auto-save directory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_save_directory: Option<PathBuf>,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./recordings")
}

impl OutputConfig {
    pub fn manual_dir(&self) -> PathBuf {
        self.manual_save_directory
            .clone()
            .unwrap_or_else(|| self.directory.clone())
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            manual_save_directory: Some(PathBuf::from("./manual_saves")),
        }
    }
}

/// Disconnect handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_max_health_failures")]
    pub max_health_failures: u32,
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_health_check_interval_ms() -> u64 {
    5000
}

fn default_max_health_failures() -> u32 {
    3
}

fn default_wait_seconds() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl ReconnectConfig {
    pub fn to_options(&self) -> MonitorOptions {
        MonitorOptions {
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            max_health_failures: self.max_health_failures.max(1),
            reconnect_wait: Duration::from_secs(self.wait_seconds),
            reconnect_poll: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval_ms(),
            max_health_failures: default_max_health_failures(),
            wait_seconds: default_wait_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Terminal shell settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiConfig {
    /// Milliseconds between monitor ticks and redraws
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    50
}

impl UiConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("./logs/midi_recorder.log")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}
