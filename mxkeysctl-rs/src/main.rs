/* mxkeysctl CLI: clap-driven front end that switches an MX Keys backlight
 * on or off through the HID++ receiver, reporting one line per outcome. */

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mxkeys::{Action, Config, HidrawBackend};
use mxkeys::driver::HidBackend;

const USAGE: &str = "Usage:\n  mxkeysctl on\n  mxkeysctl off\n  mxkeysctl force-on";

/// mxkeysctl: switch a Logitech keyboard backlight over HID++.
///
/// The three verbs are the whole interface; anything else, `--help`
/// included, prints the usage block and fails.
#[derive(Parser)]
#[command(
    name = "mxkeysctl",
    version,
    about,
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
struct Cli {
    /// Log more to stderr (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn the backlight on at its highest level.
    On,

    /// Turn the backlight off.
    Off,

    /// Pulse off then on, restarting the keyboard's auto-off timer.
    #[command(name = "force-on")]
    ForceOn,
}

impl From<Commands> for Action {
    fn from(command: Commands) -> Self {
        match command {
            Commands::On => Action::On,
            Commands::Off => Action::Off,
            Commands::ForceOn => Action::ForceOn,
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,mxkeys=debug,mxkeysctl=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Pick the receiver backend: real hidraw unless a simulated receiver is
/// requested.
fn backend() -> Result<Box<dyn HidBackend>> {
    match simulated_backend()? {
        Some(sim) => Ok(sim),
        None => {
            debug!("Using hidraw receivers");
            Ok(Box::new(HidrawBackend))
        }
    }
}

/// The receiver described by the JSON file named in `MX_KEYS_TEST_DEVICE`.
#[cfg(feature = "dev-hooks")]
fn simulated_backend() -> Result<Option<Box<dyn HidBackend>>> {
    use anyhow::Context;
    use mxkeys::test_device::SimulatedBackend;

    let Some(file) = std::env::var_os("MX_KEYS_TEST_DEVICE") else {
        return Ok(None);
    };
    let json = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read test device {}", file.to_string_lossy()))?;
    let sim = SimulatedBackend::from_json(&json).context("Failed to parse test device description")?;
    tracing::info!("Using simulated receiver from {}", file.to_string_lossy());
    Ok(Some(Box::new(sim)))
}

#[cfg(not(feature = "dev-hooks"))]
fn simulated_backend() -> Result<Option<Box<dyn HidBackend>>> {
    Ok(None)
}

/// Usage text for a rejected command line, led by clap's reason.
fn usage_error(e: &clap::Error) -> String {
    let rendered = e.render().to_string();
    let reason = rendered.lines().next().unwrap_or_default();
    format!("{reason}\n{USAGE}")
}

/// Final exit status once stdout has been flushed. A success line that
/// never reached stdout is a failure.
fn exit_status(code: u8, flushed: io::Result<()>) -> u8 {
    match flushed {
        Ok(()) => code,
        Err(e) => {
            eprintln!("Error: could not write to stdout: {e}.");
            1
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", usage_error(&e));
            return ExitCode::from(1);
        }
    };

    init_logging(cli.verbose);
    let config = Config::load();

    let backend = match backend() {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {e:#}.");
            return ExitCode::from(1);
        }
    };

    let stdout = io::stdout();
    let stderr = io::stderr();
    let code = mxkeys::execute(
        backend.as_ref(),
        &config,
        cli.command.into(),
        &mut stdout.lock(),
        &mut stderr.lock(),
    )
    .await;

    /* Flush before the runtime shuts down and the process exits */
    let flushed = stdout.lock().flush();
    debug!("Exiting with status {code}");
    ExitCode::from(exit_status(code, flushed))
}
