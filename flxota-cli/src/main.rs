//! flxota CLI - over-the-air firmware programming for packet-radio nodes.
//!
//! Talks to a programmer node attached over a serial port and feeds it an
//! Intel HEX image line by line; the programmer relays the image to the
//! target node over the radio.
//!
//! ## Features
//!
//! - Stream a HEX image through an attached programmer node
//! - Offline image validation against every target class
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use env_logger::Env;
use flxota::TargetClass;
use log::{debug, error};
use thiserror::Error;

mod commands;
mod config;
mod hexfile;
mod serial;

use config::Config;

/// CLI error classes mapped onto exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    /// Usage/invocation problem (exit 2).
    #[error("{0}")]
    Usage(String),

    /// No usable device/port (exit 4).
    #[error("{0}")]
    Device(String),
}

/// flxota - over-the-air firmware programming for packet-radio nodes.
///
/// Environment variables:
///   FLXOTA_PORT   - Default serial port
///   FLXOTA_BAUD   - Default baud rate (default: 115200)
///   FLXOTA_CLASS  - Default target class (standard, mega, largeram)
#[derive(Parser)]
#[command(name = "flxota")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the programmer node (auto-detected if not specified).
    #[arg(short, long, global = true, env = "FLXOTA_PORT")]
    port: Option<String>,

    /// Baud rate of the programmer's serial link (default: 115200).
    #[arg(short, long, global = true, env = "FLXOTA_BAUD")]
    baud: Option<u32>,

    /// Target node class deciding the image size ceiling (default: standard).
    #[arg(short, long, global = true, env = "FLXOTA_CLASS")]
    class: Option<ClassArg>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "FLXOTA_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Target class argument.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ClassArg {
    /// Small nodes, 31 KiB image ceiling (default).
    Standard,
    /// Mega-class nodes, 64 KiB ceiling.
    Mega,
    /// Larger-RAM nodes, 248 KiB ceiling.
    Largeram,
}

impl From<ClassArg> for TargetClass {
    fn from(arg: ClassArg) -> Self {
        match arg {
            ClassArg::Standard => TargetClass::Standard,
            ClassArg::Mega => TargetClass::Mega,
            ClassArg::Largeram => TargetClass::LargeRam,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Send a HEX image to the target through the programmer node.
    Flash {
        /// Path to the Intel HEX image.
        image: PathBuf,

        /// Skip the offline pre-validation of the image.
        #[arg(long)]
        skip_check: bool,
    },

    /// Validate a HEX image offline and report which targets it fits.
    Check {
        /// Path to the Intel HEX image.
        image: PathBuf,

        /// Output the report as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(None)
        .init();

    if env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Ctrl-C aborts the transfer loops cleanly instead of killing the
    // process mid-protocol
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        flxota::set_interrupt_checker(move || flag.load(Ordering::Relaxed));
        let flag = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            debug!("could not install Ctrl-C handler: {e}");
        }
    }

    debug!("flxota v{}", env!("CARGO_PKG_VERSION"));

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let result = run(&cli, &config);
    std::process::exit(match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            exit_code_for(&e, interrupted.load(Ordering::Relaxed))
        },
    });
}

/// Baud rate used when neither the CLI nor the config names one.
const DEFAULT_BAUD: u32 = 115_200;

fn run(cli: &Cli, config: &Config) -> Result<()> {
    // CLI arguments beat the config file, which beats the defaults
    let baud = cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD);
    let class = cli
        .class
        .map(TargetClass::from)
        .or_else(|| {
            config
                .transfer
                .class
                .as_deref()
                .and_then(TargetClass::from_name)
        })
        .unwrap_or_default();

    match &cli.command {
        Commands::Flash { image, skip_check } => commands::flash::run(
            &commands::flash::FlashArgs {
                image: image.clone(),
                class,
                port: cli.port.clone(),
                baud,
                non_interactive: cli.non_interactive,
                quiet: cli.quiet,
                skip_check: *skip_check,
            },
            config,
        ),
        Commands::Check { image, json } => commands::check::run(image, *json),
        Commands::ListPorts { json } => commands::ports::run(*json),
        Commands::Completions { shell } => {
            commands::completions::run(*shell, &mut Cli::command());
            Ok(())
        },
    }
}

/// Map an error chain onto the CLI exit code contract.
fn exit_code_for(error: &anyhow::Error, interrupted: bool) -> i32 {
    if interrupted
        || error
            .chain()
            .any(|c| matches!(c.downcast_ref::<flxota::Error>(), Some(flxota::Error::Interrupted)))
    {
        return 130;
    }
    for cause in error.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Device(_) => 4,
            };
        }
    }
    1
}
