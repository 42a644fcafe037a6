// FREQCTL SIMULATION MODE
// SYNTHETIC POLICIES DRIVEN BY A GENERATED LOAD. EXERCISES THE FULL CONTROL
// LOOP (CONTENTION, RATE LIMITING, I/O BOOST, WORKER) WITHOUT TOUCHING SYSFS.
//
// LOAD SHAPE PER CPU: SLOW TRIANGLE WAVE + JITTER, PERIODIC I/O BURSTS,
// OCCASIONAL HEAVY-TASK WAKEUPS.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::{debug, warn};

use freqctl::event::now_ns;
use freqctl::hooks::{FreqCommitter, NoHooks, TaskRef, UtilSample, UtilizationSource};
use freqctl::sysfs::DryRunCommitter;
use freqctl::tuning::{self, CAPACITY_SCALE};
use freqctl::{DomainConfig, Governor, UpdateFlags};

use super::{apply_sets, SimulateArgs};

const WAVE_PERIOD_MS: u64 = 800;
const IO_BURST_EVERY: u64 = 37;     // UPDATES BETWEEN I/O BURSTS
const IO_BURST_LEN: u64 = 4;        // CONSECUTIVE I/O WAKES PER BURST
const HEAVY_EVERY: u64 = 211;       // UPDATES BETWEEN HEAVY-TASK WAKEUPS
const SLOW_COMMIT_US: u64 = 200;    // EMULATED sysfs WRITE LATENCY

pub struct SyntheticLoad {
    start: Instant,
    // ONE XORSHIFT STATE AND ONE UPDATE COUNTER PER CPU
    rng: Vec<AtomicU64>,
    seq: Vec<AtomicU64>,
}

impl SyntheticLoad {
    pub fn new(nr_cpus: usize, seed: u64) -> Self {
        Self {
            start: Instant::now(),
            rng: (0..nr_cpus)
                .map(|c| AtomicU64::new((seed ^ (c as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)) | 1))
                .collect(),
            seq: (0..nr_cpus).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn next_rand(&self, cpu: usize) -> u64 {
        let Some(cell) = self.rng.get(cpu) else {
            return 0;
        };
        let mut x = cell.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        cell.store(x, Ordering::Relaxed);
        x
    }

    // COUNTER OF UPDATES ISSUED FOR THIS CPU
    pub fn tick(&self, cpu: usize) -> u64 {
        self.seq.get(cpu).map_or(0, |s| s.fetch_add(1, Ordering::Relaxed))
    }

    pub fn flags_for(seq: u64) -> UpdateFlags {
        let mut flags = UpdateFlags::NONE;
        if seq % IO_BURST_EVERY < IO_BURST_LEN {
            flags = flags | UpdateFlags::IO_WAIT;
        }
        if seq % HEAVY_EVERY == 0 {
            flags = flags | UpdateFlags::HEAVY_TASK;
        }
        flags
    }
}

impl UtilizationSource for SyntheticLoad {
    fn sample(&self, cpu: usize) -> UtilSample {
        let ms = self.start.elapsed().as_millis() as u64;
        let phase = (ms + cpu as u64 * 97) % WAVE_PERIOD_MS;
        let half = WAVE_PERIOD_MS / 2;
        let tri = if phase < half { phase } else { WAVE_PERIOD_MS - phase };
        let base = tri * CAPACITY_SCALE / half;
        let jitter = self.next_rand(cpu) % 128;
        let util = (base + jitter).saturating_sub(64).min(CAPACITY_SCALE);

        let seq = self.seq.get(cpu).map_or(0, |s| s.load(Ordering::Relaxed));
        UtilSample {
            util,
            capacity: CAPACITY_SCALE,
            io_wait: seq % IO_BURST_EVERY < IO_BURST_LEN,
            heavy_task: (seq % HEAVY_EVERY == 0).then_some(TaskRef {
                pid: 1_000 + cpu as u32,
                load: CAPACITY_SCALE * 3 / 4,
            }),
        }
    }
}

// SLOW PATH STAND-IN: BLOCKS LIKE A sysfs WRITE, WRITES NOTHING
struct SlowDryRun;

impl FreqCommitter for SlowDryRun {
    fn commit_blocking(&self, domain: usize, freq: u64) {
        std::thread::sleep(Duration::from_micros(SLOW_COMMIT_US));
        debug!(domain, freq, "dry run commit (slow)");
    }
}

pub fn run(args: &SimulateArgs, verbose: bool, shutdown: &AtomicBool) -> Result<()> {
    if args.domains == 0 || args.cpus_per_domain == 0 {
        bail!("need at least one domain with at least one cpu");
    }

    let nr_cpus = args.domains * args.cpus_per_domain;
    let tick_ns = tuning::tick_for_interval(args.tick_us.max(1) * 1_000);
    let configs: Vec<DomainConfig> = (0..args.domains)
        .map(|d| {
            let first = d * args.cpus_per_domain;
            DomainConfig {
                tick_ns,
                ..DomainConfig::new(first, (first..first + args.cpus_per_domain).collect(), args.freqs.clone())
            }
        })
        .collect();

    let committer: Arc<dyn FreqCommitter> = if args.slow {
        Arc::new(SlowDryRun)
    } else {
        Arc::new(DryRunCommitter)
    };
    let load = Arc::new(SyntheticLoad::new(nr_cpus, args.seed));
    let gov = Governor::build(configs, load.clone(), committer, Arc::new(NoHooks))?;

    println!("FREQCTL v1.0.0 (SIMULATION)");
    println!("DOMAINS:         {} x {} CPUS", args.domains, args.cpus_per_domain);
    println!("FREQS:           {:?}", args.freqs);
    println!("DURATION:        {} ms (tick {} us)", args.duration_ms, args.tick_us);
    println!("PATH:            {}", if args.slow { "SLOW" } else { "FAST" });
    apply_sets(&gov, &args.sets)?;
    println!();

    let deadline = Instant::now() + Duration::from_millis(args.duration_ms);
    let tick = Duration::from_micros(args.tick_us.max(1));
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        for cpu in 0..nr_cpus {
            let (gov, load, done) = (&gov, &load, &done);
            let spawned = std::thread::Builder::new()
                .name(format!("freqctl-sim{}", cpu))
                .spawn_scoped(s, move || {
                    while !done.load(Ordering::Relaxed) {
                        std::thread::sleep(tick);
                        let seq = load.tick(cpu);
                        gov.on_utilization_update(cpu, now_ns(), SyntheticLoad::flags_for(seq));
                    }
                });
            if let Err(e) = spawned {
                warn!(cpu, "failed to spawn load thread: {}", e);
            }
        }

        while Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(10));
        }
        done.store(true, Ordering::Relaxed);
    });

    gov.shutdown();

    let stats = gov.total_stats();
    println!("UPDATES:         {}", stats.updates);
    println!("RECOMPUTES:      {} (quick rampup {})", stats.recomputes, stats.quick_rampups);
    println!("RATE LIMITED:    {}", stats.rate_limited);
    println!("POSTPONED:       {}", stats.postponed);
    println!("CONTENDED:       {}", stats.contended);
    println!("COMMITS:         {} (coalesced {})", stats.commits, stats.coalesced);
    if verbose {
        for d in gov.domains() {
            let s = d.stats();
            println!("  POLICY {:<3} commits={} requests={} worker={} final={}",
                d.id(), s.commits, s.requests, s.worker_commits, d.current_frequency());
        }
    }

    if args.dump_log {
        gov.dump_logs();
    }
    gov.summaries();
    Ok(())
}
