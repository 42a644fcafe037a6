// FREQCTL LIVE MODE
// ONE SAMPLING THREAD PER CPU FEEDS /proc/stat UTILIZATION INTO THE GOVERNOR.
// THE MAIN THREAD PRINTS TELEMETRY UNTIL CTRL+C.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::warn;

use freqctl::event::now_ns;
use freqctl::hooks::{FreqCommitter, NoHooks};
use freqctl::sysfs::{self, DryRunCommitter, ProcStatSource, SysfsCommitter};
use freqctl::tuning;
use freqctl::{DomainConfig, Governor, UpdateFlags};

use super::{apply_sets, RunArgs};

pub fn run(args: &RunArgs, verbose: bool, shutdown: &AtomicBool) -> Result<()> {
    let root = Path::new(&args.sysfs_root);
    let policies = sysfs::discover_policies(root)?;

    for p in &policies {
        if p.governor != "userspace" && !args.dry_run {
            bail!(
                "policy{} runs the '{}' governor; switch it to 'userspace' or pass --dry-run",
                p.id, p.governor
            );
        }
    }

    let cpu_root = Path::new(sysfs::CPU_ROOT);
    let nr_cpus = policies.iter().flat_map(|p| p.cpus.iter()).max().map_or(0, |m| m + 1);
    let capacities: Vec<u64> = (0..nr_cpus).map(|c| sysfs::read_cpu_capacity(cpu_root, c)).collect();

    let interval_ns = args.interval_us.saturating_mul(1_000);
    let configs: Vec<DomainConfig> = policies
        .iter()
        .map(|p| DomainConfig {
            tick_ns: tuning::tick_for_interval(interval_ns),
            initial_freq: p.cur_freq,
            ..DomainConfig::new(p.id, p.cpus.clone(), p.freqs.clone())
        })
        .collect();

    let committer: Arc<dyn FreqCommitter> = if args.dry_run {
        Arc::new(DryRunCommitter)
    } else {
        Arc::new(SysfsCommitter::new(root))
    };
    let source = Arc::new(ProcStatSource::new(sysfs::PROC_STAT, capacities));
    let gov = Governor::build(configs, source, committer, Arc::new(NoHooks))?;

    println!("FREQCTL v1.0.0");
    println!("POLICIES:        {}", policies.len());
    for p in &policies {
        println!("  POLICY {:<3} CPUS {:?}  {}..{} KHZ ({} STEPS)  governor: {}",
            p.id, p.cpus, p.freqs.iter().min().unwrap_or(&0), p.freqs.iter().max().unwrap_or(&0),
            p.freqs.len(), if p.governor.is_empty() { "unknown" } else { &p.governor });
    }
    println!("INTERVAL:        {} us", args.interval_us);
    println!("DRY RUN:         {}", args.dry_run);
    println!("VERBOSE:         {}", verbose);
    apply_sets(&gov, &args.sets)?;
    println!();

    println!("FREQCTL IS ACTIVE (CTRL+C TO EXIT)");

    let interval = Duration::from_micros(args.interval_us.max(1));
    std::thread::scope(|s| {
        for d in gov.domains() {
            for &cpu in d.cpus() {
                let gov = &gov;
                let spawned = std::thread::Builder::new()
                    .name(format!("freqctl-cpu{}", cpu))
                    .spawn_scoped(s, move || {
                        while !shutdown.load(Ordering::Relaxed) {
                            std::thread::sleep(interval);
                            gov.on_utilization_update(cpu, now_ns(), UpdateFlags::NONE);
                        }
                    });
                if let Err(e) = spawned {
                    warn!(cpu, "failed to spawn sampler: {}", e);
                }
            }
        }
        gov.monitor(shutdown, Duration::from_millis(args.report_ms.max(1)), verbose);
    });

    println!("FREQCTL IS SHUTTING DOWN");
    gov.shutdown();

    if args.dump_log {
        gov.dump_logs();
    }
    gov.summaries();

    println!("FREQCTL OUT.");
    Ok(())
}
