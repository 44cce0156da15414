//! Serial port selection.
//!
//! Resolves the programmer node's port from, in order: an explicit
//! `--port`, the configuration file, and live detection. With several
//! candidates an interactive picker is shown; non-interactive mode fails
//! instead of prompting so scripts stay deterministic.

use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use log::{debug, info};
use serialport::SerialPortType;
use std::io::IsTerminal;

use crate::CliError;
use crate::config::Config;

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_owned()).into()
}

/// Pick the serial port to use.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port) = &options.port {
        return Ok(port.clone());
    }

    if let Some(port) = &config.connection.serial {
        debug!("using port from config: {port}");
        return Ok(port.clone());
    }

    let ports = detect_candidate_ports()?;
    if ports.is_empty() {
        return Err(usage_err(
            "no serial ports found; connect the programmer node or pass --port",
        ));
    }

    if ports.len() == 1 {
        let (name, label) = &ports[0];
        info!("auto-selected port: {name} [{label}]");
        return Ok(name.clone());
    }

    // ambiguous: several candidates
    if options.non_interactive {
        return Err(usage_err(
            "multiple serial ports found; pass --port in non-interactive mode",
        ));
    }
    if !std::io::stderr().is_terminal() {
        return Err(usage_err(
            "multiple serial ports found and no terminal to prompt on; pass --port",
        ));
    }

    let items: Vec<String> = ports
        .iter()
        .map(|(name, label)| format!("{name}  {}", style(label).dim()))
        .collect();
    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the programmer's serial port")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(ports[index].0.clone())
}

/// Detect ports worth offering, USB devices first.
fn detect_candidate_ports() -> Result<Vec<(String, String)>> {
    let all = serialport::available_ports()
        .map_err(|e| CliError::Device(format!("enumerating serial ports: {e}")))?;

    let mut usb = Vec::new();
    let mut other = Vec::new();
    for port in all {
        match port.port_type {
            SerialPortType::UsbPort(ref info) => {
                let label = info
                    .product
                    .clone()
                    .unwrap_or_else(|| format!("usb {:04x}:{:04x}", info.vid, info.pid));
                usb.push((port.port_name, label));
            },
            SerialPortType::BluetoothPort => {},
            _ => other.push((port.port_name, "serial".to_owned())),
        }
    }

    // USB adapters are the usual programmer link; fall back to everything
    // else only when none are present
    Ok(if usb.is_empty() { other } else { usb })
}
