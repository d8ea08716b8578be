// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn, Level};

use midi_recorder::config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH};
use midi_recorder::midi::{DeviceCatalog, PortChooser, DEFAULT_PORT};
use midi_recorder::recording::Monitor;
use midi_recorder::ui::{self, App, UiState};

fn print_usage() {
    println!("midi-recorder - Round-the-clock MIDI recorder");
    println!();
    println!("Usage: midi-recorder [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <PATH>         Configuration file (default {})", DEFAULT_CONFIG_PATH);
    println!("  --debug                 Log at debug level");
    println!("  --skip-device-check     Do not verify the MIDI input at startup");
    println!("  --interactive           Ask which input to use if the configured one is missing");
    println!("                          (instead of switching to the first input)");
    println!("  --list-sources          List available MIDI inputs and exit");
    println!("  --help                  Show this help message");
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    config: PathBuf,
    debug: bool,
    skip_device_check: bool,
    interactive: bool,
    list_sources: bool,
    help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            debug: false,
            skip_device_check: false,
            interactive: false,
            list_sources: false,
            help: false,
        }
    }
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = iter.next() else {
                    bail!("--config requires a path");
                };
                parsed.config = PathBuf::from(path);
            }
            "--debug" => parsed.debug = true,
            "--skip-device-check" => parsed.skip_device_check = true,
            "--interactive" => parsed.interactive = true,
            "--list-sources" => parsed.list_sources = true,
            "--help" | "-h" => parsed.help = true,
            other => bail!("Unknown option: {}", other),
        }
    }

    Ok(parsed)
}

fn init_logging(config: &LoggingConfig, debug: bool) -> Result<()> {
    let level = if debug {
        Level::DEBUG
    } else {
        config.level.parse().unwrap_or(Level::INFO)
    };

    if let Some(parent) = config.file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)
        .with_context(|| format!("Failed to open log file: {:?}", config.file))?;

    // The terminal belongs to the UI, so logs only go to the file
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn print_sources(catalog: &DeviceCatalog) {
    let ports = catalog.describe();
    if ports.is_empty() {
        println!("No MIDI inputs found");
        return;
    }
    println!("MIDI inputs:");
    for port in ports {
        println!("  {}: {}", port.index, port.name);
    }
}

/// Port to switch to, if the configured one is `default` or missing.
///
/// With `interactive` a missing named port is kept so the prompt can ask.
fn select_port(configured: &str, available: &[String], interactive: bool) -> Option<String> {
    let first = available.first()?;
    if configured == DEFAULT_PORT {
        return Some(first.clone());
    }
    if interactive || available.iter().any(|p| p == configured) {
        None
    } else {
        Some(first.clone())
    }
}

/// Make sure an input exists and persist the port that will be used
fn check_devices(
    config: &mut AppConfig,
    config_path: &Path,
    catalog: &DeviceCatalog,
    interactive: bool,
) -> Result<()> {
    info!(port = %config.midi.port_name, "Configured MIDI port");

    let available = catalog.list_inputs();
    if available.is_empty() {
        bail!("No available MIDI devices found");
    }
    info!(ports = ?available, "Available MIDI ports");

    if let Some(selected) = select_port(&config.midi.port_name, &available, interactive) {
        info!(port = %selected, "MIDI port auto-selected");
        config.set_port_name(selected);
        config.save(config_path)?;
    }
    Ok(())
}

/// Numbered stdin prompt, active only while `enabled` is set
fn stdin_chooser(enabled: Arc<AtomicBool>) -> Arc<PortChooser> {
    Arc::new(move |missing: &str, available: &[String]| {
        if !enabled.load(Ordering::SeqCst) {
            return None;
        }

        println!("MIDI input '{}' not found. Available inputs:", missing);
        for (i, name) in available.iter().enumerate() {
            println!("  {}: {}", i + 1, name);
        }
        println!("  0: Cancel");
        print!("Select input: ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        match line.trim().parse::<usize>() {
            Ok(n) if n >= 1 => available.get(n - 1).cloned(),
            _ => None,
        }
    })
}

fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load_or_create(&args.config)?;
    init_logging(&config.logging, args.debug)?;
    info!("MIDI recorder started");

    let monitor = Monitor::new(config.transport(), config.monitor_options());

    if args.list_sources {
        print_sources(monitor.catalog());
        return Ok(());
    }

    if !args.skip_device_check {
        info!("Starting startup device check");
        if let Err(e) = check_devices(&mut config, &args.config, monitor.catalog(), args.interactive) {
            error!(error = %e, "Device check failed");
            eprintln!("Device check failed: {e:#}");
            std::process::exit(1);
        }
        info!("Device check completed");
    }

    config.ensure_directories()?;

    let state = Arc::new(Mutex::new(UiState::default()));
    let prompt = Arc::new(AtomicBool::new(args.interactive));
    let mut monitor = monitor.with_status_sink(ui::notice_sink(&state));
    if args.interactive {
        monitor = monitor.with_port_chooser(stdin_chooser(Arc::clone(&prompt)));
    }

    let mut settings = config.monitor_settings();
    match monitor.start(settings.clone()) {
        Ok(()) => {
            if let Some(port) = monitor.status().port_name {
                settings.port_name = port;
            }
        }
        Err(e) => warn!(error = %e, "Monitoring not started"),
    }
    prompt.store(false, Ordering::SeqCst);

    let mut app = App::new(Arc::clone(&state))?;
    let result = ui::run(&mut app, &monitor, &mut settings, &mut config, &args.config);
    drop(app);

    ui::shutdown(&monitor);
    info!("MIDI recorder stopped");
    result
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    if args.help {
        print_usage();
        return Ok(());
    }

    run(args)
}
