// FREQCTL v1.0.0 -- SCHEDULER-DRIVEN CPU FREQUENCY GOVERNOR
// PER-CLUSTER CONTROL LOOP FOR LINUX CPUFREQ POLICIES
//
// FREQUENCY DECISIONS HAPPEN IN THE LIBRARY (ONE CONTROLLER PER POLICY)
// THE BINARY HANDLES: DISCOVERY, SAMPLING, CONFIGURATION, REPORTING

mod cli;

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cli::{RunArgs, SimulateArgs};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "freqctl")]
#[command(about = "FREQCTL -- PER-CLUSTER CPU FREQUENCY CONTROL LOOP")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    // PRINT VERBOSE OUTPUT (DEBUG LOGGING, PER-POLICY TELEMETRY)
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    // DRIVE THE REAL CPUFREQ POLICIES FROM /proc/stat SAMPLES
    Run(RunArgs),
    // DRIVE SYNTHETIC POLICIES WITH A GENERATED LOAD (NO HARDWARE ACCESS)
    Simulate(SimulateArgs),
    // VERIFY KERNEL AND SYSFS PREREQUISITES
    Check,
    // LIST EVERY TUNABLE WITH ITS DEFAULT
    Tunables,
}

fn init_logging(verbose: bool) {
    // RUST_LOG WINS OVER --verbose
    let default = if verbose { "freqctl=debug" } else { "freqctl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    match cli.command {
        Command::Run(args) => cli::run::run(&args, cli.verbose, &SHUTDOWN),
        Command::Simulate(args) => cli::simulate::run(&args, cli.verbose, &SHUTDOWN),
        Command::Check => cli::check::run_check(),
        Command::Tunables => {
            cli::print_tunables();
            Ok(())
        }
    }
}
