// FREQCTL COMMAND LINE
// SHARED ARGUMENTS AND THE --set PARSER. ONE MODULE PER SUBCOMMAND.

pub mod check;
pub mod run;
pub mod simulate;

use anyhow::{Context, Result};
use clap::Args;
use regex::Regex;

use freqctl::tuning::{TunableKey, Tunables};
use freqctl::Governor;

#[derive(Args)]
pub struct RunArgs {
    // SAMPLING INTERVAL PER CPU IN MICROSECONDS (4MS DEFAULT -- ONE TICK AT HZ=250)
    #[arg(long, default_value_t = 4_000)]
    pub interval_us: u64,

    // TELEMETRY INTERVAL IN MILLISECONDS
    #[arg(long, default_value_t = 1_000)]
    pub report_ms: u64,

    // OVERRIDE A TUNABLE ON EVERY POLICY: --set margin_pct=25 (REPEATABLE)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub sets: Vec<String>,

    // COMPUTE DECISIONS BUT NEVER WRITE scaling_setspeed
    #[arg(long)]
    pub dry_run: bool,

    // DUMP FULL COMMIT LOG ON EXIT
    #[arg(long)]
    pub dump_log: bool,

    // CPUFREQ SYSFS ROOT
    #[arg(long, default_value = freqctl::sysfs::CPUFREQ_ROOT)]
    pub sysfs_root: String,
}

#[derive(Args)]
pub struct SimulateArgs {
    // NUMBER OF POLICY DOMAINS
    #[arg(long, default_value_t = 2)]
    pub domains: usize,

    // CPUS PER DOMAIN
    #[arg(long, default_value_t = 4)]
    pub cpus_per_domain: usize,

    // FREQUENCY TABLE, KHZ, COMMA SEPARATED
    #[arg(long, value_delimiter = ',', default_value = "300000,600000,900000,1200000,1500000,1800000")]
    pub freqs: Vec<u64>,

    // RUN TIME IN MILLISECONDS
    #[arg(long, default_value_t = 2_000)]
    pub duration_ms: u64,

    // UPDATE PERIOD PER CPU IN MICROSECONDS
    #[arg(long, default_value_t = 1_000)]
    pub tick_us: u64,

    // USE THE SLOW PATH (DEDICATED WORKER, BLOCKING COMMITS)
    #[arg(long)]
    pub slow: bool,

    // LOAD GENERATOR SEED
    #[arg(long, default_value_t = 0x5eed)]
    pub seed: u64,

    // OVERRIDE A TUNABLE ON EVERY POLICY (REPEATABLE)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub sets: Vec<String>,

    // DUMP FULL COMMIT LOG ON EXIT
    #[arg(long)]
    pub dump_log: bool,
}

// "margin_pct=25" -> (MarginPct, 25)
pub fn parse_set(s: &str) -> Result<(TunableKey, u64)> {
    let re = Regex::new(r"^\s*([a-z_]+)\s*=\s*(\d+)\s*$")?;
    let caps = re
        .captures(s)
        .with_context(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let key = TunableKey::from_name(&caps[1])?;
    let value: u64 = caps[2]
        .parse()
        .with_context(|| format!("value out of range in '{}'", s))?;
    Ok((key, value))
}

pub fn apply_sets(gov: &Governor, sets: &[String]) -> Result<()> {
    for s in sets {
        let (key, value) = parse_set(s)?;
        gov.set_tunable(key, value)
            .with_context(|| format!("--set {}", s))?;
        println!("TUNABLE:         {} = {}", key.name(), value);
    }
    Ok(())
}

pub fn print_tunables() {
    let defaults = Tunables::default();
    println!("{:<24} {:>12}", "TUNABLE", "DEFAULT");
    println!("{}", "-".repeat(37));
    for key in TunableKey::ALL {
        println!("{:<24} {:>12}", key.name(), defaults.get(key));
    }
}
