//! Serial port listing.

use anyhow::{Context, Result};
use serde::Serialize;
use serialport::SerialPortType;

#[derive(Serialize)]
struct PortReport {
    name: String,
    kind: String,
    vid: Option<u16>,
    pid: Option<u16>,
    product: Option<String>,
}

/// List the serial ports visible on this machine.
pub fn run(json: bool) -> Result<()> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;

    let reports: Vec<PortReport> = ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => PortReport {
                name: p.port_name,
                kind: "usb".into(),
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            SerialPortType::BluetoothPort => PortReport {
                name: p.port_name,
                kind: "bluetooth".into(),
                vid: None,
                pid: None,
                product: None,
            },
            SerialPortType::PciPort => PortReport {
                name: p.port_name,
                kind: "pci".into(),
                vid: None,
                pid: None,
                product: None,
            },
            SerialPortType::Unknown => PortReport {
                name: p.port_name,
                kind: "unknown".into(),
                vid: None,
                pid: None,
                product: None,
            },
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for report in &reports {
        match (report.vid, report.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{}] {:04x}:{:04x} {}",
                report.name,
                report.kind,
                vid,
                pid,
                report.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}  [{}]", report.name, report.kind),
        }
    }
    Ok(())
}
