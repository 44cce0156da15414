//! Image transfer through the programmer node.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use flxota::{HostConfig, HostTransfer, TargetClass};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::config::Config;
use crate::hexfile::HexImage;
use crate::serial::{SerialOptions, select_serial_port};
use crate::CliError;

/// Character-level timeout of the programmer serial link. Short, so the
/// response waits inside the host driver keep polling responsively.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Arguments for the flash command.
pub struct FlashArgs {
    /// Path to the HEX image.
    pub image: PathBuf,
    /// Target class used for the pre-flight size check.
    pub class: TargetClass,
    /// Explicit serial port, if any.
    pub port: Option<String>,
    /// Serial baud rate.
    pub baud: u32,
    /// Never prompt.
    pub non_interactive: bool,
    /// Suppress the progress bar.
    pub quiet: bool,
    /// Skip the offline pre-validation.
    pub skip_check: bool,
}

/// Stream an image to the target through the programmer node.
pub fn run(args: &FlashArgs, config: &Config) -> Result<()> {
    let image = HexImage::load(&args.image)?;
    info!(
        "loaded {}: {} records, {} payload bytes",
        args.image.display(),
        image.records.len(),
        image.payload_bytes
    );

    if !args.skip_check {
        let layout = args.class.layout();
        if image.payload_bytes > layout.max_payload {
            anyhow::bail!(
                "image is {} payload bytes but the {} class accepts at most {}",
                image.payload_bytes,
                args.class,
                layout.max_payload
            );
        }
    }

    let options = SerialOptions {
        port: args.port.clone(),
        non_interactive: args.non_interactive,
    };
    let port_name = select_serial_port(&options, config)?;
    debug!("opening {} at {} baud", port_name, args.baud);

    let mut port = serialport::new(port_name.clone(), args.baud)
        .timeout(PORT_TIMEOUT)
        .open()
        .map_err(|e| CliError::Device(format!("opening {port_name}: {e}")))?;

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(image.records.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} records ({eta})",
            )
            .expect("static template")
            .progress_chars("#>-"),
        );
        bar
    };

    let result = HostTransfer::with_config(&mut port, HostConfig::default())
        .transfer(&image.records, |sent, _total| {
            progress.set_position(sent as u64);
        });
    progress.finish_and_clear();

    result.with_context(|| format!("transferring {}", args.image.display()))?;

    eprintln!(
        "{} {} records, {} payload bytes delivered; target is rebooting",
        style("OK").green().bold(),
        image.records.len(),
        image.payload_bytes
    );
    Ok(())
}
