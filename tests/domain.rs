// FREQCTL POLICY DOMAIN TESTS
// FULL CONTROL LOOP: UPDATE -> GATES -> SELECTION -> DISPATCH -> COMMIT
//
// DRIVEN WITH A SETTABLE UTILIZATION SOURCE, A RECORDING COMMITTER AND
// SETTABLE POLICY HOOKS. TIMESTAMPS ARE SYNTHETIC.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use freqctl::boost::BoostReason;
use freqctl::dispatch::{DispatchMode, WorkerMode};
use freqctl::hooks::{FreqCommitter, PolicyHooks, TaskRef, UtilSample, UtilizationSource};
use freqctl::tuning::{self, TunableKey};
use freqctl::{ConfigError, DomainConfig, PolicyDomain, UpdateFlags};

const MS: u64 = 1_000_000;
const US: u64 = 1_000;
const NR_CPUS: usize = 4;

// --- FIXTURES ---

struct Load {
    util: [AtomicU64; NR_CPUS],
    capacity: [AtomicU64; NR_CPUS],
    io_wait: AtomicBool,
    heavy_load: AtomicU64,
}

impl Load {
    fn new() -> Self {
        Self {
            util: std::array::from_fn(|_| AtomicU64::new(0)),
            capacity: std::array::from_fn(|_| AtomicU64::new(1024)),
            io_wait: AtomicBool::new(false),
            heavy_load: AtomicU64::new(0),
        }
    }

    fn set(&self, cpu: usize, util: u64) {
        self.util[cpu].store(util, Ordering::Relaxed);
    }

    fn set_capacity(&self, cpu: usize, capacity: u64) {
        self.capacity[cpu].store(capacity, Ordering::Relaxed);
    }
}

impl UtilizationSource for Load {
    fn sample(&self, cpu: usize) -> UtilSample {
        let heavy = self.heavy_load.load(Ordering::Relaxed);
        UtilSample {
            util: self.util[cpu].load(Ordering::Relaxed),
            capacity: self.capacity[cpu].load(Ordering::Relaxed),
            io_wait: self.io_wait.load(Ordering::Relaxed),
            heavy_task: (heavy > 0).then_some(TaskRef { pid: 42, load: heavy }),
        }
    }
}

struct Recorder {
    fast: bool,
    delay: Duration,
    commits: Mutex<Vec<u64>>,
    started: Mutex<Option<Sender<u64>>>,
}

impl Recorder {
    fn new(fast: bool) -> Self {
        Self { fast, delay: Duration::ZERO, commits: Mutex::new(Vec::new()), started: Mutex::new(None) }
    }

    fn commits(&self) -> Vec<u64> {
        self.commits.lock().unwrap().clone()
    }
}

impl FreqCommitter for Recorder {
    fn fast_switch(&self) -> bool {
        self.fast
    }

    fn commit_blocking(&self, _domain: usize, freq: u64) {
        if let Some(tx) = self.started.lock().unwrap().as_ref() {
            let _ = tx.send(freq);
        }
        std::thread::sleep(self.delay);
        self.commits.lock().unwrap().push(freq);
    }
}

#[derive(Default)]
struct Limits {
    boost: AtomicU64,
    ceiling: AtomicU64,
    wall: AtomicU64,
    bw_floor: AtomicU64,
}

impl PolicyHooks for Limits {
    fn external_boost(&self, _cpu: usize, _util: u64) -> u64 {
        self.boost.load(Ordering::Relaxed)
    }

    fn apply_ceiling(&self, _domain: usize, freq: u64) -> u64 {
        match self.ceiling.load(Ordering::Relaxed) {
            0 => freq,
            c => c,
        }
    }

    fn wall(&self, _domain: usize) -> Option<u64> {
        let w = self.wall.load(Ordering::Relaxed);
        (w > 0).then_some(w)
    }

    fn bandwidth_floor(&self, _cpu: usize) -> u64 {
        self.bw_floor.load(Ordering::Relaxed)
    }
}

struct Rig {
    d: Arc<PolicyDomain>,
    load: Arc<Load>,
    rec: Arc<Recorder>,
    hooks: Arc<Limits>,
}

const TABLE: [u64; 5] = [300, 600, 900, 1200, 1500];

fn rig_with(cfg: DomainConfig, rec: Recorder) -> Rig {
    let load = Arc::new(Load::new());
    let rec = Arc::new(rec);
    let hooks = Arc::new(Limits::default());
    let d = PolicyDomain::new(cfg, load.clone(), rec.clone(), hooks.clone()).unwrap();
    Rig { d, load, rec, hooks }
}

fn fast_rig() -> Rig {
    rig_with(DomainConfig::new(0, vec![0, 1, 2, 3], TABLE.to_vec()), Recorder::new(true))
}

// SLOW PATH, HOST-DRIVEN WORKER, STARTING AT THE BOTTOM OF THE TABLE
fn manual_rig() -> Rig {
    let cfg = DomainConfig {
        worker: WorkerMode::Manual,
        initial_freq: Some(300),
        ..DomainConfig::new(0, vec![0, 1], TABLE.to_vec())
    };
    rig_with(cfg, Recorder::new(false))
}

fn no_rate_limits(d: &PolicyDomain) {
    d.set_tunable(TunableKey::UpRateLimitUs, 0).unwrap();
    d.set_tunable(TunableKey::DownRateLimitUs, 0).unwrap();
}

fn rate_limits_ms(d: &PolicyDomain, ms: u64) {
    d.set_tunable(TunableKey::UpRateLimitUs, ms * 1_000).unwrap();
    d.set_tunable(TunableKey::DownRateLimitUs, ms * 1_000).unwrap();
}

// === END TO END ===

#[test]
fn margin_lifts_util_to_next_step() {
    let r = fast_rig();
    r.d.set_tunable(TunableKey::MarginPct, 25).unwrap();
    r.load.set(0, 320);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);

    // 320 * 1.25 = 400 -> 1500 * 400 / 1024 = 585 -> 600
    assert_eq!(r.rec.commits(), vec![600]);
    assert_eq!(r.d.last_decision(), Some((600, BoostReason::MarginBoost)));
    assert_eq!(r.d.current_frequency(), 600);
    assert_eq!(r.d.mode(), DispatchMode::Fast);
}

#[test]
fn raw_util_without_margin() {
    let r = fast_rig();
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);

    assert_eq!(r.rec.commits(), vec![600]);
    assert_eq!(r.d.last_decision(), Some((600, BoostReason::RawUtilization)));
}

#[test]
fn boosted_util_maps_without_second_margin() {
    let r = fast_rig();
    r.d.set_tunable(TunableKey::MarginPct, 25).unwrap();
    // MARGIN ALREADY FOLDED INTO THE BOOSTED VALUE: 1500 * 400 / 1024 = 585 -> 600
    assert_eq!(r.d.select_frequency(400, 1024), Some((600, BoostReason::RawUtilization)));
}

#[test]
fn first_update_commits_even_at_current_frequency() {
    let r = fast_rig();
    r.load.set(0, 1024);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert_eq!(r.rec.commits(), vec![1500]);
}

#[test]
fn commit_log_records_each_dispatch() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    r.load.set(0, 1024);
    r.d.on_utilization_update(0, 11 * MS, UpdateFlags::NONE);

    let commits = r.rec.commits();
    assert_eq!(commits.len(), 2);
    let logged: Vec<u64> = r.d.with_log(|log| log.iter_chronological().map(|s| s.freq).collect());
    assert_eq!(logged, commits);
    assert!(r.d.with_log(|log| log.iter_chronological().all(|s| s.fast)));
}

// === FREQUENCY SELECTION ===

#[test]
fn adaptive_band_pins_low_and_mid_range() {
    let cfg = DomainConfig::new(0, vec![0], vec![300, 500, 800, 1200, 1500]);
    let r = rig_with(cfg, Recorder::new(true));
    r.d.set_tunable(TunableKey::AdaptiveLowFreq, 500).unwrap();
    r.d.set_tunable(TunableKey::AdaptiveHighFreq, 1200).unwrap();

    // CAPACITY == TABLE MAX: RAW FREQUENCY EQUALS UTILIZATION
    assert_eq!(r.d.select_frequency(300, 1500), Some((500, BoostReason::AdaptiveLow)));
    assert_eq!(r.d.select_frequency(800, 1500), Some((1200, BoostReason::AdaptiveHigh)));
    assert_eq!(r.d.select_frequency(1200, 1500), Some((1200, BoostReason::AdaptiveHigh)));
    assert_eq!(r.d.select_frequency(1500, 1500), Some((1500, BoostReason::RawUtilization)));
}

#[test]
fn adaptive_band_rejects_inversion() {
    let r = fast_rig();
    r.d.set_tunable(TunableKey::AdaptiveHighFreq, 800).unwrap();
    assert_eq!(r.d.tunable(TunableKey::AdaptiveHighFreq), 900);
    assert_eq!(
        r.d.set_tunable(TunableKey::AdaptiveLowFreq, 1200),
        Err(ConfigError::AdaptiveBandInverted { low: 1200, high: 900 }),
    );
    assert!(r.d.set_kernel_adaptive(1500, 0).is_err());
    // REJECTED VALUES LEAVE THE BAND UNTOUCHED
    assert_eq!(r.d.tunable(TunableKey::AdaptiveLowFreq), 0);
}

#[test]
fn kernel_band_combines_with_user_band() {
    let r = fast_rig();
    r.d.set_kernel_adaptive(500, 1200).unwrap();
    // 500 SNAPS UP TO 600
    assert_eq!(r.d.select_frequency(300, 1500), Some((600, BoostReason::AdaptiveLow)));
    r.d.set_tunable(TunableKey::AdaptiveLowFreq, 900).unwrap();
    assert_eq!(r.d.select_frequency(300, 1500), Some((900, BoostReason::AdaptiveLow)));
    r.d.set_kernel_adaptive(0, 0).unwrap();
    r.d.set_tunable(TunableKey::AdaptiveLowFreq, 0).unwrap();
    assert_eq!(r.d.select_frequency(300, 1500), Some((300, BoostReason::RawUtilization)));
}

#[test]
fn ceiling_and_wall_round_down_into_table() {
    let r = fast_rig();
    r.hooks.ceiling.store(1000, Ordering::Relaxed);
    assert_eq!(r.d.select_frequency(1500, 1500), Some((900, BoostReason::Ceiling)));
    // BELOW THE CEILING: UNTOUCHED
    assert_eq!(r.d.select_frequency(300, 1500), Some((300, BoostReason::RawUtilization)));

    r.hooks.wall.store(700, Ordering::Relaxed);
    assert_eq!(r.d.select_frequency(1500, 1500), Some((600, BoostReason::Clamp)));
}

#[test]
fn scaling_limits_clamp_final_frequency() {
    let r = fast_rig();
    r.d.set_tunable(TunableKey::ScalingMaxFreq, 1200).unwrap();
    r.d.set_tunable(TunableKey::ScalingMinFreq, 600).unwrap();
    assert_eq!(r.d.select_frequency(1500, 1500), Some((1200, BoostReason::ExternalLimitsChange)));
    assert_eq!(r.d.select_frequency(100, 1500), Some((600, BoostReason::ExternalLimitsChange)));
    assert_eq!(r.d.select_frequency(900, 1500), Some((900, BoostReason::RawUtilization)));
    assert_eq!(
        r.d.set_tunable(TunableKey::ScalingMinFreq, 1500),
        Err(ConfigError::LimitsInverted { min: 1500, max: 1200 }),
    );
}

#[test]
fn selection_is_monotonic_and_quantized() {
    let r = fast_rig();
    let mut prev = 0;
    for util in (0..=1600).step_by(11) {
        let (freq, _) = r.d.select_frequency(util, 1500).unwrap();
        assert!(freq >= prev, "util={} freq={} prev={}", util, freq, prev);
        assert!(TABLE.contains(&freq), "freq {} not in table", freq);
        prev = freq;
    }
    assert_eq!(prev, 1500);
}

#[test]
fn zero_capacity_changes_nothing() {
    let r = fast_rig();
    assert_eq!(r.d.select_frequency(512, 0), None);

    r.load.set_capacity(0, 0);
    r.load.set(0, 512);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert!(r.rec.commits().is_empty());
    assert_eq!(r.d.current_frequency(), 1500);
}

#[test]
fn heaviest_cpu_compared_by_fraction_of_capacity() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();
    // CPU 0: 300/512 = 58%, CPU 1: 500/1024 = 48%
    r.load.set_capacity(0, 512);
    r.load.set(0, 300);
    r.load.set(1, 500);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    r.d.on_utilization_update(1, 10 * MS, UpdateFlags::NONE);

    assert_eq!(r.d.heaviest_cpu(), 0);
    // 1500 * 300 / 512 = 878 -> 900
    assert_eq!(r.d.last_decision(), Some((900, BoostReason::RawUtilization)));
    assert_eq!(r.d.cpu_state(1).map(|c| c.boosted_util), Some(500));
}

// === BOOST SOURCES ===

#[test]
fn explicit_boost_hook_drives_frequency() {
    let r = fast_rig();
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();
    r.hooks.boost.store(700, Ordering::Relaxed);
    r.load.set(0, 300);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::EXPLICIT_BOOST);
    // 1500 * 700 / 1024 = 1025 -> 1200
    assert_eq!(r.d.last_decision(), Some((1200, BoostReason::ExplicitTaskBoost)));
}

#[test]
fn heavy_task_saturates_domain() {
    let r = fast_rig();
    r.load.set(0, 100);
    r.load.heavy_load.store(900, Ordering::Relaxed);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::HEAVY_TASK);
    assert_eq!(r.d.last_decision(), Some((1500, BoostReason::HeavyTask)));
    assert_eq!(r.d.cpu_state(0).and_then(|c| c.heavy_task).map(|t| t.pid), Some(42));
}

#[test]
fn margin_boost_skips_saturation_shortcut() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();
    r.load.set(0, 1024);

    // SATURATED AND ALREADY AT MAX: NO TABLE LOOKUP
    let lookups = r.d.table().lookups();
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), Some((1500, BoostReason::RawUtilization)));
    assert_eq!(r.d.table().lookups(), lookups);

    r.d.set_tunable(TunableKey::MarginBoost, 1).unwrap();
    let lookups = r.d.table().lookups();
    r.d.on_utilization_update(0, 11 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), Some((1500, BoostReason::MarginBoost)));
    assert_eq!(r.d.table().lookups(), lookups + 1);
}

#[test]
fn margin_boost_overrides_explicit_boost_at_zero_margin() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();
    r.hooks.boost.store(1024, Ordering::Relaxed);
    r.load.set(0, 200);

    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), Some((1500, BoostReason::ExplicitTaskBoost)));

    // 1500 * 200 / 1024 = 292 -> 300
    r.d.set_tunable(TunableKey::MarginBoost, 1).unwrap();
    r.d.on_utilization_update(0, 11 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), Some((300, BoostReason::MarginBoost)));
    assert_eq!(r.d.current_frequency(), 300);
    assert_eq!(r.d.cpu_state(0).map(|c| c.reason), Some(BoostReason::MarginBoost));
}

#[test]
fn io_wait_ramps_frequency_up() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    let mut freqs = Vec::new();
    for step in 0..7u64 {
        let flags = if step % 2 == 0 { UpdateFlags::IO_WAIT } else { UpdateFlags::NONE };
        r.d.on_utilization_update(0, (10 + step) * MS, flags);
        if step % 2 == 0 {
            freqs.push(r.d.last_decision().map(|(f, _)| f));
        }
    }
    // BOOST 128 -> 256 -> 512 -> 1024
    assert_eq!(freqs, vec![Some(300), Some(600), Some(900), Some(1500)]);
    assert_eq!(r.d.last_decision(), Some((1500, BoostReason::IoWait)));
    assert_eq!(r.d.cpu_state(0).map(|c| c.io_boost.value()), Some(1024));
}

#[test]
fn io_boost_ramps_at_sampling_spacing() {
    let interval = MS;
    let cfg = DomainConfig {
        tick_ns: tuning::tick_for_interval(interval),
        ..DomainConfig::new(0, vec![0, 1, 2, 3], TABLE.to_vec())
    };
    let r = rig_with(cfg, Recorder::new(true));
    no_rate_limits(&r.d);

    let mut now = 10 * MS;
    let mut boosts = Vec::new();
    for step in 0..8u64 {
        // SAMPLERS WAKE SLIGHTLY AFTER EACH INTERVAL
        now += interval + 50 * US;
        let flags = if step % 2 == 0 { UpdateFlags::IO_WAIT } else { UpdateFlags::NONE };
        r.d.on_utilization_update(0, now, flags);
        if step % 2 == 0 {
            boosts.push(r.d.cpu_state(0).map(|c| c.io_boost.value()));
        }
    }
    assert_eq!(boosts, vec![Some(128), Some(256), Some(512), Some(1024)]);
}

#[test]
fn io_boost_tunable_disables_ramp() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    r.d.set_tunable(TunableKey::IoBoost, 0).unwrap();
    for step in 0..7u64 {
        r.d.on_utilization_update(0, (10 + step) * MS, UpdateFlags::IO_WAIT);
    }
    assert_eq!(r.d.last_decision(), Some((300, BoostReason::None)));
    assert_eq!(r.d.cpu_state(0).map(|c| c.io_boost.value()), Some(0));
}

#[test]
fn stale_cpu_io_boost_ignored() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    // CPU 1 BOOSTED, THEN GOES QUIET FOR LONGER THAN A TICK
    r.d.on_utilization_update(1, 10 * MS, UpdateFlags::IO_WAIT);
    r.d.on_utilization_update(0, 20 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.cpu_state(1).map(|c| c.io_boost.value()), Some(0));
    assert_eq!(r.d.last_decision().map(|(f, _)| f), Some(300));
}

// === RATE LIMITING ===

#[test]
fn updates_inside_rate_limit_are_dropped() {
    let r = fast_rig();
    rate_limits_ms(&r.d, 4);
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    r.load.set(0, 1024);
    for t in [11, 12, 13] {
        r.d.on_utilization_update(0, t * MS, UpdateFlags::NONE);
    }
    assert_eq!(r.rec.commits().len(), 1);
    assert_eq!(r.d.stats().rate_limited, 3);

    r.d.on_utilization_update(0, 14 * MS, UpdateFlags::NONE);
    assert_eq!(r.rec.commits().last(), Some(&1500));
}

#[test]
fn heavy_flag_takes_quick_rampup() {
    let r = fast_rig();
    rate_limits_ms(&r.d, 4);
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    r.load.set(0, 1024);

    r.d.on_utilization_update(0, 10 * MS + 400 * US, UpdateFlags::HEAVY_TASK);
    r.d.on_utilization_update(0, 10 * MS + 600 * US, UpdateFlags::NONE);
    assert_eq!(r.rec.commits().len(), 1);

    r.d.on_utilization_update(0, 10 * MS + 600 * US, UpdateFlags::HEAVY_TASK);
    assert_eq!(r.rec.commits().len(), 2);
    assert_eq!(r.d.current_frequency(), 1500);
    assert_eq!(r.d.stats().quick_rampups, 1);
}

#[test]
fn limits_change_forces_recompute() {
    let r = fast_rig();
    rate_limits_ms(&r.d, 4);
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    let first = r.d.current_frequency();

    r.d.set_tunable(TunableKey::ScalingMaxFreq, 600).unwrap();
    r.d.on_utilization_update(0, 11 * MS, UpdateFlags::NONE);
    assert!(first > 600);
    assert_eq!(r.rec.commits(), vec![first, 600]);
    assert_eq!(r.d.last_decision(), Some((600, BoostReason::ExternalLimitsChange)));
}

#[test]
fn rising_bandwidth_floor_forces_commit() {
    let r = fast_rig();
    rate_limits_ms(&r.d, 4);
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    r.hooks.bw_floor.store(100, Ordering::Relaxed);
    r.d.on_utilization_update(0, 11 * MS, UpdateFlags::NONE);

    // SAME TARGET, BUT THE FORCED UPDATE STILL REACHES THE HARDWARE
    let commits = r.rec.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0], commits[1]);

    // UNCHANGED FLOOR: BACK UNDER THE RATE LIMIT
    r.d.on_utilization_update(0, 12 * MS, UpdateFlags::NONE);
    assert_eq!(r.rec.commits().len(), 2);
}

#[test]
fn steady_frequency_is_not_postponed() {
    let r = fast_rig();
    no_rate_limits(&r.d);
    r.load.set(0, 400);
    for t in 10..14 {
        r.d.on_utilization_update(0, t * MS, UpdateFlags::NONE);
    }
    let s = r.d.stats();
    assert_eq!(r.rec.commits().len(), 1);
    assert_eq!(s.recomputes, 4);
    assert_eq!(s.postponed, 0);
}

#[test]
fn high_tier_margin_then_damped_drop() {
    let r = fast_rig();
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();
    r.d.set_tunable(TunableKey::MarginHiPct, 50).unwrap();
    r.d.set_tunable(TunableKey::TierThresholdFreq, 1200).unwrap();

    // STARTS AT 1500: HIGH TIER MARGIN APPLIES. 400 * 1.5 = 600 -> 878 -> 900
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), Some((900, BoostReason::MarginBoost)));

    // NOW LOW TIER (NO MARGIN). ONE STEP DOWN AFTER ~1 PERIOD IS POSTPONED.
    r.d.on_utilization_update(0, 15 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), Some((600, BoostReason::RawUtilization)));
    assert_eq!(r.d.current_frequency(), 900);
    assert_eq!(r.d.stats().postponed, 1);

    // FOUR PERIODS LATER THE DROP LANDS
    r.d.on_utilization_update(0, 26 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.current_frequency(), 600);
}

// === SLOW PATH ===

#[test]
fn slow_path_coalesces_to_latest_request() {
    let r = manual_rig();
    no_rate_limits(&r.d);
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();
    assert_eq!(r.d.mode(), DispatchMode::Slow);

    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert!(r.d.work_in_progress());
    assert_eq!(r.d.next_frequency(), 600);

    r.load.set(0, 600);
    r.d.on_utilization_update(0, 11 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.next_frequency(), 900);

    assert_eq!(r.d.run_worker_once(), Some(900));
    assert_eq!(r.d.run_worker_once(), None);
    assert_eq!(r.rec.commits(), vec![900]);
    assert_eq!(r.d.current_frequency(), 900);

    let s = r.d.stats();
    assert_eq!(s.requests, 2);
    assert_eq!(s.coalesced, 1);
    assert_eq!(s.worker_commits, 1);
}

#[test]
fn queued_request_follows_load_back_down() {
    let r = manual_rig();
    no_rate_limits(&r.d);
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();

    r.load.set(0, 600);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.next_frequency(), 900);

    // BACK TO THE COMMITTED FREQUENCY BEFORE THE WORKER RUNS
    r.load.set(0, 100);
    r.d.on_utilization_update(0, 10 * MS + 100 * US, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), Some((300, BoostReason::RawUtilization)));
    assert_eq!(r.d.next_frequency(), 300);
    assert_eq!(r.d.stats().postponed, 0);

    assert_eq!(r.d.run_worker_once(), Some(300));
    assert_eq!(r.rec.commits(), vec![300]);
    assert_eq!(r.d.current_frequency(), 300);
}

#[test]
fn repeated_identical_update_is_idempotent() {
    let r = manual_rig();
    no_rate_limits(&r.d);
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    let decision = r.d.last_decision();
    let lookups = r.d.table().lookups();

    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.last_decision(), decision);
    // CACHED RAW FREQUENCY REUSED WHILE THE REQUEST IS IN FLIGHT
    assert_eq!(r.d.table().lookups(), lookups);
    assert_eq!(r.d.stats().requests, 1);
}

#[test]
fn worker_commits_outside_the_lock() {
    let (tx, rx) = mpsc::channel();
    let rec = Recorder {
        delay: Duration::from_millis(20),
        started: Mutex::new(Some(tx)),
        ..Recorder::new(false)
    };
    let cfg = DomainConfig {
        initial_freq: Some(300),
        ..DomainConfig::new(0, vec![0], TABLE.to_vec())
    };
    let r = rig_with(cfg, rec);
    no_rate_limits(&r.d);
    r.d.set_tunable(TunableKey::MarginPct, 0).unwrap();

    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(600));

    // WORKER IS BLOCKED IN THE COMMIT. THE DOMAIN LOCK IS FREE.
    r.load.set(0, 600);
    r.d.on_utilization_update(0, 11 * MS, UpdateFlags::NONE);
    assert_eq!(r.d.next_frequency(), 900);

    r.d.stop();
    assert_eq!(r.rec.commits(), vec![600, 900]);
    assert_eq!(r.d.current_frequency(), 900);
}

// === LIFECYCLE ===

#[test]
fn stopped_domain_ignores_updates() {
    let r = fast_rig();
    r.load.set(0, 400);
    r.d.on_utilization_update(0, 10 * MS, UpdateFlags::NONE);
    r.d.stop();
    r.d.stop();
    assert!(!r.d.is_attached());

    r.load.set(0, 1024);
    r.d.on_utilization_update(0, 20 * MS, UpdateFlags::HEAVY_TASK);
    assert_eq!(r.d.stats().updates, 1);
    assert_eq!(r.rec.commits().len(), 1);
}

#[test]
fn bad_configs_rejected() {
    let load = Arc::new(Load::new());
    let rec = Arc::new(Recorder::new(true));
    let hooks = Arc::new(Limits::default());
    let build = |cfg| PolicyDomain::new(cfg, load.clone(), rec.clone(), hooks.clone()).err();

    assert_eq!(build(DomainConfig::new(3, vec![], TABLE.to_vec())), Some(ConfigError::EmptyDomain(3)));
    assert_eq!(build(DomainConfig::new(0, vec![0], vec![])), Some(ConfigError::EmptyFreqTable));
    assert_eq!(build(DomainConfig::new(0, vec![0, 0], TABLE.to_vec())), Some(ConfigError::CpuAlreadyOwned(0)));
}

#[test]
fn tunables_by_name() {
    let r = fast_rig();
    r.d.set_tunable_by_name("up_rate_limit_us", 2_500).unwrap();
    assert_eq!(r.d.tunable(TunableKey::UpRateLimitUs), 2_500);
    assert_eq!(
        r.d.set_tunable_by_name("target_loads", 1),
        Err(ConfigError::UnknownTunable("target_loads".to_string())),
    );
    assert!(r.d.set_tunable_by_name("margin_boost", 2).is_err());
}

// === CONCURRENCY ===

#[test]
fn concurrent_updates_from_every_cpu() {
    let r = fast_rig();
    let clock = AtomicU64::new(10 * MS);
    for cpu in 0..NR_CPUS {
        r.load.set(cpu, 128 * (cpu as u64 + 1));
    }

    std::thread::scope(|s| {
        for cpu in 0..NR_CPUS {
            let (d, load, clock) = (&r.d, &r.load, &clock);
            s.spawn(move || {
                for i in 0..2_000u64 {
                    load.set(cpu, (i * 37 + cpu as u64 * 101) % 1024);
                    let now = clock.fetch_add(50 * US, Ordering::Relaxed);
                    d.on_utilization_update(cpu, now, UpdateFlags::NONE);
                }
            });
        }
    });

    let s = r.d.stats();
    assert_eq!(s.updates, (NR_CPUS * 2_000) as u64);
    assert!(s.commits >= 1);
    assert!(s.commits <= s.recomputes);
    assert!(r.rec.commits().iter().all(|f| TABLE.contains(f)));
    assert_eq!(r.rec.commits().last(), Some(&r.d.current_frequency()));
}
