// FREQCTL POLICY DOMAIN CONTROLLER
// ONE INSTANCE PER CLOCK/VOLTAGE DOMAIN. INVOKED FROM EVERY CPU OF THE DOMAIN
// ON EVERY UTILIZATION UPDATE, POSSIBLY CONCURRENTLY.
//
// LOCKING:
//   PER-CPU LOCK:  TAKEN ALONE BY THE UPDATING CPU (STEP 1), OR UNDER THE
//                  DOMAIN LOCK DURING AGGREGATION. NEVER THE REVERSE ORDER.
//   DOMAIN LOCK:   EVERY DECISION FIELD. TUNABLES ARE ATOMICS BUT ARE ONLY
//                  WRITTEN WITH THIS LOCK HELD.
//
// PIPELINE: IO BOOST -> LOCK -> RECOMPUTE GATE -> AGGREGATE (BOOST RESOLVER)
//           -> SELECT (TABLE, BAND, CEILING, WALL, LIMITS) -> RETIER
//           -> POSTPONE GATE -> DISPATCH

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;

use tracing::{debug, info, trace, warn};

use crate::boost::{resolve_boost, BoostInputs, BoostReason, HeavyParams};
use crate::dispatch::{spawn_worker, DispatchMode, Doorbell, WorkerMode};
use crate::error::ConfigError;
use crate::event::{EventLog, Snapshot};
use crate::freq_table::FreqTable;
use crate::hooks::{FreqCommitter, PolicyHooks, TaskRef, UtilSample, UtilizationSource};
use crate::iowait::IoBoost;
use crate::ratelimit::{self, PostponeInputs, RateLimits, Recompute, UpdateFlags};
use crate::tuning::{self, freq_to_capacity, TunableKey, Tunables, DEFAULT_TICK_NS};

// THE CONTROL LOOP MUST KEEP RUNNING AFTER A PANICKING COLLABORATOR
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug)]
pub struct DomainConfig {
    pub id: usize,
    pub cpus: Vec<usize>,
    pub freqs: Vec<u64>,
    pub tick_ns: u64,
    // FREQUENCY THE HARDWARE RUNS AT WHEN THE DOMAIN STARTS (DEFAULT: TABLE MAX)
    pub initial_freq: Option<u64>,
    pub worker: WorkerMode,
}

impl DomainConfig {
    pub fn new(id: usize, cpus: Vec<usize>, freqs: Vec<u64>) -> Self {
        Self {
            id,
            cpus,
            freqs,
            tick_ns: DEFAULT_TICK_NS,
            initial_freq: None,
            worker: WorkerMode::Thread,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CpuState {
    pub cpu: usize,
    pub util: u64,
    pub max_capacity: u64,
    pub io_boost: IoBoost,
    pub last_update_time: u64,
    pub heavy_task: Option<TaskRef>,
    // CAPACITY OF THE DOMAIN'S MIN FREQUENCY ON THIS CPU
    pub min_capacity_floor: u64,
    pub boosted_util: u64,
    pub reason: BoostReason,
    last_bw_floor: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DomainStats {
    pub updates: u64,
    pub contended: u64,
    pub rate_limited: u64,
    pub recomputes: u64,
    pub quick_rampups: u64,
    pub postponed: u64,
    pub commits: u64,
    pub requests: u64,
    pub coalesced: u64,
    pub worker_commits: u64,
}

struct DomainState {
    current_freq: u64,
    next_freq: u64,
    cached_raw_freq: u64,
    cached_freq: u64,
    last_update_time: u64,
    need_freq_update: bool,
    quick_rampup: bool,
    work_in_progress: bool,
    heaviest_cpu: usize,
    decision: Option<(u64, BoostReason)>,
    // ACTIVE TIER, REFRESHED AFTER EVERY SELECTION
    margin_pct: u64,
    up_rate_limit_ns: u64,
    down_rate_limit_ns: u64,
    doorbell: Option<Doorbell>,
    detached: bool,
    stats: DomainStats,
    log: EventLog,
}

#[derive(Clone, Copy, Debug)]
struct Aggregate {
    util: u64,
    capacity: u64,
    cpu: usize,
    reason: BoostReason,
}

pub struct PolicyDomain {
    id: usize,
    cpus: Vec<usize>,
    table: FreqTable,
    tick_ns: u64,
    mode: DispatchMode,
    tunables: Tunables,
    limits_changed: AtomicBool,
    attached: AtomicBool,
    updates: AtomicU64,
    contended: AtomicU64,
    cpu_states: Vec<Mutex<CpuState>>,
    state: Mutex<DomainState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    source: Arc<dyn UtilizationSource>,
    committer: Arc<dyn FreqCommitter>,
    hooks: Arc<dyn PolicyHooks>,
}

impl PolicyDomain {
    pub fn new(
        cfg: DomainConfig,
        source: Arc<dyn UtilizationSource>,
        committer: Arc<dyn FreqCommitter>,
        hooks: Arc<dyn PolicyHooks>,
    ) -> Result<Arc<Self>, ConfigError> {
        let DomainConfig { id, cpus, freqs, tick_ns, initial_freq, worker } = cfg;

        if cpus.is_empty() {
            return Err(ConfigError::EmptyDomain(id));
        }
        let mut sorted = cpus.clone();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::CpuAlreadyOwned(pair[0]));
        }
        let table = FreqTable::new(freqs)?;
        let tick_ns = if tick_ns == 0 { DEFAULT_TICK_NS } else { tick_ns };

        let mode = if committer.fast_switch() { DispatchMode::Fast } else { DispatchMode::Slow };
        let (doorbell, rx) = match (mode, worker) {
            (DispatchMode::Slow, WorkerMode::Thread) => {
                let (bell, rx) = Doorbell::pair();
                (Some(bell), Some(rx))
            }
            _ => (None, None),
        };

        let tunables = Tunables::default();
        let current = initial_freq.map_or(table.max(), |f| table.ceil(f));
        let tier = tuning::tier_params(&tunables, current);

        let state = DomainState {
            current_freq: current,
            next_freq: current,
            cached_raw_freq: 0,
            cached_freq: 0,
            last_update_time: 0,
            need_freq_update: false,
            quick_rampup: false,
            work_in_progress: false,
            heaviest_cpu: cpus[0],
            decision: None,
            margin_pct: tier.margin_pct,
            up_rate_limit_ns: tier.up_rate_limit_ns,
            down_rate_limit_ns: tier.down_rate_limit_ns,
            doorbell,
            detached: false,
            stats: DomainStats::default(),
            log: EventLog::new(),
        };

        let cpu_states = cpus
            .iter()
            .map(|&cpu| Mutex::new(CpuState { cpu, ..Default::default() }))
            .collect();

        let domain = Arc::new(Self {
            id,
            cpus,
            table,
            tick_ns,
            mode,
            tunables,
            // FIRST UPDATE ALWAYS RECOMPUTES AND COMMITS
            limits_changed: AtomicBool::new(true),
            attached: AtomicBool::new(true),
            updates: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            cpu_states,
            state: Mutex::new(state),
            worker: Mutex::new(None),
            source,
            committer,
            hooks,
        });

        if let Some(rx) = rx {
            let handle = spawn_worker(id, Arc::downgrade(&domain), rx)
                .map_err(|e| ConfigError::WorkerSpawn(id, e.to_string()))?;
            *lock(&domain.worker) = Some(handle);
        }

        info!(
            domain = id,
            cpus = ?domain.cpus,
            min = domain.table.min(),
            max = domain.table.max(),
            steps = domain.table.len(),
            path = mode.label(),
            "policy domain started"
        );
        Ok(domain)
    }

    // --- UPDATE ENTRY POINT ---

    // NEVER FAILS. A SKIPPED OR POSTPONED UPDATE KEEPS THE CURRENT FREQUENCY.
    pub fn on_utilization_update(&self, cpu: usize, now: u64, flags: UpdateFlags) {
        if !self.attached.load(Ordering::Acquire) {
            return;
        }
        let Some(slot) = self.slot(cpu) else {
            warn!(domain = self.id, cpu, "update for a cpu outside the domain");
            return;
        };
        self.updates.fetch_add(1, Ordering::Relaxed);

        let sample = self.source.sample(cpu);
        let io_wake = sample.io_wait || flags.contains(UpdateFlags::IO_WAIT);
        let boost_pending = self.update_cpu(slot, now, io_wake, &sample);

        // NOTHING URGENT: DON'T WAIT ON A CPU THAT IS ALREADY DECIDING
        let urgent = boost_pending
            || flags.intersects(UpdateFlags::HEAVY_TASK | UpdateFlags::EXPLICIT_BOOST)
            || self.limits_changed.load(Ordering::Acquire);
        let mut st = if urgent {
            lock(&self.state)
        } else {
            match self.state.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    self.contended.fetch_add(1, Ordering::Relaxed);
                    trace!(domain = self.id, cpu, "domain busy, update skipped");
                    return;
                }
            }
        };
        if st.detached {
            return;
        }
        self.decide(&mut st, now, flags);
    }

    // STEP 1+2: THIS CPU'S OWN STATE. RETURNS WHETHER AN I/O BOOST IS PENDING.
    fn update_cpu(&self, slot: usize, now: u64, io_wake: bool, sample: &UtilSample) -> bool {
        let cpu = self.cpus[slot];
        let bw_floor = self.hooks.bandwidth_floor(cpu);
        let (min_freq, _) = self.tunables.scaling_limits(&self.table);

        let mut c = lock(&self.cpu_states[slot]);
        let elapsed = now.saturating_sub(c.last_update_time);
        if self.tunables.flag(TunableKey::IoBoost) {
            c.io_boost.update(elapsed, self.tick_ns, io_wake);
        } else {
            c.io_boost.reset();
        }
        c.last_update_time = now;
        c.max_capacity = sample.capacity;
        c.util = sample.util.min(sample.capacity);
        c.heavy_task = sample.heavy_task;
        c.min_capacity_floor = freq_to_capacity(min_freq, self.table.max(), sample.capacity);

        if bw_floor > c.last_bw_floor {
            self.limits_changed.store(true, Ordering::Release);
            debug!(domain = self.id, cpu, bw_floor, "bandwidth floor raised");
        }
        c.last_bw_floor = bw_floor;
        c.io_boost.pending()
    }

    fn decide(&self, st: &mut DomainState, now: u64, flags: UpdateFlags) {
        match self.recompute_gate(st, now, flags) {
            Recompute::Skip => {
                st.stats.rate_limited += 1;
                return;
            }
            Recompute::QuickRampup => {
                st.quick_rampup = true;
                st.stats.quick_rampups += 1;
            }
            Recompute::Normal => {}
        }
        st.stats.recomputes += 1;

        let Some(agg) = self.aggregate(now, st.margin_pct) else {
            trace!(domain = self.id, "no cpu reported capacity, keeping frequency");
            st.quick_rampup = false;
            return;
        };
        st.heaviest_cpu = agg.cpu;

        let Some((freq, reason)) = self.select(st, agg.util, agg.capacity, agg.reason) else {
            st.quick_rampup = false;
            return;
        };
        st.decision = Some((freq, reason));
        self.retier(st, freq);

        // ALREADY COMMITTED OR ALREADY QUEUED: NOTHING TO DEFER
        if freq == self.pending_freq(st) && !st.need_freq_update {
            st.quick_rampup = false;
            return;
        }
        if self.should_postpone(st, now, freq) {
            st.stats.postponed += 1;
            trace!(domain = self.id, freq, current = st.current_freq, "change postponed");
        } else {
            self.dispatch(st, now, freq, reason, &agg);
        }
        st.quick_rampup = false;
    }

    // --- RATE LIMITER ---

    fn recompute_gate(&self, st: &mut DomainState, now: u64, flags: UpdateFlags) -> Recompute {
        if self.limits_changed.swap(false, Ordering::AcqRel) {
            st.need_freq_update = true;
            return Recompute::Normal;
        }
        let limits = RateLimits {
            up_ns: st.up_rate_limit_ns,
            down_ns: st.down_rate_limit_ns,
            heavy_rampup_ns: self.tunables.raw(TunableKey::HeavyRampupUs),
            boost_rampup_ns: self.tunables.raw(TunableKey::BoostRampupUs),
        };
        ratelimit::should_recompute(now.saturating_sub(st.last_update_time), &limits, flags)
    }

    // LAST COMMITTED FREQUENCY, OR THE ONE A QUEUED JOB WILL COMMIT
    fn pending_freq(&self, st: &DomainState) -> u64 {
        match self.mode {
            DispatchMode::Fast => st.current_freq,
            DispatchMode::Slow => st.next_freq,
        }
    }

    fn should_postpone(&self, st: &DomainState, now: u64, freq: u64) -> bool {
        // A QUEUED JOB IS REWRITTEN, NEVER LEFT HOLDING AN OLDER DECISION
        let in_flight = self.mode == DispatchMode::Slow && st.work_in_progress;
        let p = PostponeInputs {
            elapsed_ns: now.saturating_sub(st.last_update_time),
            target: freq,
            current: st.current_freq,
            up_ns: st.up_rate_limit_ns,
            period_ns: self.tick_ns,
            forced: st.need_freq_update || st.quick_rampup || in_flight,
        };
        ratelimit::should_postpone(&p, &self.table)
    }

    fn retier(&self, st: &mut DomainState, freq: u64) {
        let tier = tuning::tier_params(&self.tunables, freq);
        st.margin_pct = tier.margin_pct;
        st.up_rate_limit_ns = tier.up_rate_limit_ns;
        st.down_rate_limit_ns = tier.down_rate_limit_ns;
    }

    // --- AGGREGATION ---

    // DOMAIN-WIDE MAXIMUM, COMPARED AS A FRACTION OF EACH CPU'S CAPACITY
    fn aggregate(&self, now: u64, margin_pct: u64) -> Option<Aggregate> {
        let heavy = HeavyParams {
            margin_pct: self.tunables.raw(TunableKey::HeavyMarginPct),
            min_freq: self.tunables.raw(TunableKey::HeavyMinFreq),
            max_freq: self.table.max(),
        };
        let margin_boost = self.tunables.flag(TunableKey::MarginBoost);
        let mut best: Option<Aggregate> = None;

        for cell in &self.cpu_states {
            let mut c = lock(cell);

            // STALE CPU: ITS I/O BOOST NO LONGER REFLECTS ANYTHING
            if now.saturating_sub(c.last_update_time) > self.tick_ns {
                c.io_boost.reset();
            }

            let cap = c.max_capacity;
            let util = c.util.min(cap);
            let inputs = BoostInputs {
                util,
                max_capacity: cap,
                explicit_boost: self.hooks.external_boost(c.cpu, util),
                heavy_load: c.heavy_task.map(|t| t.load),
                margin_pct,
                margin_boost,
            };
            let (mut boosted, mut reason) = resolve_boost(&inputs, &heavy);
            let io = c.io_boost.apply(cap);
            if io > boosted {
                boosted = io;
                reason = BoostReason::IoWait;
            }
            c.boosted_util = boosted;
            c.reason = reason;

            if cap == 0 {
                continue;
            }
            let wins = match best {
                None => true,
                Some(b) => boosted as u128 * b.capacity as u128 > b.util as u128 * cap as u128,
            };
            if wins {
                best = Some(Aggregate { util: boosted, capacity: cap, cpu: c.cpu, reason });
            }
        }
        best
    }

    // --- FREQUENCY SELECTION ---

    // SELECT WITH AN EXPLICIT UTILIZATION, BYPASSING AGGREGATION. SHARES THE
    // RAW-FREQUENCY CACHE WITH THE UPDATE PATH.
    pub fn select_frequency(&self, boosted_util: u64, capacity: u64) -> Option<(u64, BoostReason)> {
        let reason = if boosted_util > 0 { BoostReason::RawUtilization } else { BoostReason::None };
        let mut st = lock(&self.state);
        self.select(&mut st, boosted_util, capacity, reason)
    }

    fn select(
        &self,
        st: &mut DomainState,
        util: u64,
        capacity: u64,
        reason: BoostReason,
    ) -> Option<(u64, BoostReason)> {
        if capacity == 0 {
            return None;
        }
        let util = util.min(capacity);
        let max_freq = self.table.max();
        let raw = (max_freq as u128 * util as u128 / capacity as u128) as u64;
        let mut reason = reason;

        let mut freq = if raw == st.cached_raw_freq && st.work_in_progress && !st.need_freq_update {
            st.cached_freq
        } else {
            // SATURATED AND ALREADY AT MAX: NOTHING HIGHER TO LOOK UP
            let freq = if reason != BoostReason::MarginBoost
                && util == capacity
                && st.current_freq == max_freq
            {
                max_freq
            } else {
                self.table.ceil(raw)
            };
            st.cached_raw_freq = raw;
            st.cached_freq = freq;
            freq
        };

        let (low, high) = self.tunables.adaptive_band();
        if high > 0 {
            if freq < low {
                freq = low;
                reason = BoostReason::AdaptiveLow;
            } else if freq <= high {
                freq = high;
                reason = BoostReason::AdaptiveHigh;
            }
        } else {
            let ceiling = self.hooks.apply_ceiling(self.id, freq);
            if ceiling < freq {
                freq = self.table.floor(ceiling);
                reason = BoostReason::Ceiling;
            }
            if let Some(wall) = self.hooks.wall(self.id) {
                if wall < freq {
                    freq = self.table.floor(wall);
                    reason = BoostReason::Clamp;
                }
            }
        }

        let (min, max) = self.tunables.scaling_limits(&self.table);
        let clamped = freq.max(min).min(max);
        if clamped != freq {
            freq = clamped;
            reason = BoostReason::ExternalLimitsChange;
        }
        Some((freq, reason))
    }

    // --- DISPATCH ---

    fn dispatch(&self, st: &mut DomainState, now: u64, freq: u64, reason: BoostReason, agg: &Aggregate) {
        st.need_freq_update = false;
        st.next_freq = freq;
        st.last_update_time = now;
        st.log.record(Snapshot {
            ts_ns: now,
            freq,
            util: agg.util,
            cpu: agg.cpu,
            reason,
            fast: self.mode == DispatchMode::Fast,
        });
        debug!(
            domain = self.id,
            freq,
            reason = reason.label(),
            cpu = agg.cpu,
            util = agg.util,
            path = self.mode.label(),
            "frequency dispatched"
        );

        match self.mode {
            DispatchMode::Fast => {
                self.committer.commit_sync(self.id, freq);
                st.current_freq = freq;
                st.stats.commits += 1;
            }
            DispatchMode::Slow => {
                st.stats.requests += 1;
                if st.work_in_progress {
                    // WORKER WILL PICK UP THE LATEST next_freq
                    st.stats.coalesced += 1;
                    return;
                }
                st.work_in_progress = true;
                if let Some(bell) = &st.doorbell {
                    if !bell.ring() {
                        warn!(domain = self.id, "worker gone, request dropped");
                    }
                }
            }
        }
    }

    // SLOW-PATH JOB BODY. RUN BY THE WORKER THREAD, OR BY THE HOST IN
    // WorkerMode::Manual (ONE CALLER AT A TIME). RETURNS THE COMMITTED FREQUENCY.
    pub fn run_worker_once(&self) -> Option<u64> {
        let freq = {
            let mut st = lock(&self.state);
            if !st.work_in_progress {
                return None;
            }
            st.work_in_progress = false;
            st.next_freq
        };

        self.committer.commit_blocking(self.id, freq);

        let mut st = lock(&self.state);
        st.current_freq = freq;
        st.stats.commits += 1;
        st.stats.worker_commits += 1;
        debug!(domain = self.id, freq, "worker committed");
        Some(freq)
    }

    // --- LIFECYCLE ---

    // DETACH FIRST SO NO NEW REQUEST CAN ARRIVE, THEN WAIT FOR THE WORKER.
    // A JOB REQUESTED BEFORE DETACH IS STILL COMMITTED.
    pub fn stop(&self) {
        self.detach();
        self.join_worker();
    }

    // NO UPDATE IS ACCEPTED AFTER THIS RETURNS. CLOSING THE DOORBELL LETS THE
    // WORKER DRAIN THE LAST REQUEST AND EXIT.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
        let mut st = lock(&self.state);
        st.detached = true;
        st.doorbell = None;
    }

    pub fn join_worker(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(domain = self.id, "worker panicked");
            }
        }
        info!(domain = self.id, "policy domain stopped");
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    // --- TUNABLE SURFACE ---

    pub fn tunable(&self, key: TunableKey) -> u64 {
        self.tunables.get(key)
    }

    pub fn set_tunable(&self, key: TunableKey, value: u64) -> Result<(), ConfigError> {
        let mut st = lock(&self.state);
        let stored = self.tunables.validate(key, value, &self.table)?;
        self.tunables.store(key, stored);
        let current = st.current_freq;
        self.retier(&mut st, current);
        self.limits_changed.store(true, Ordering::Release);
        info!(domain = self.id, tunable = key.name(), value, "tunable updated");
        Ok(())
    }

    // VALIDATE WITHOUT STORING. RETURNS THE FORM set_tunable WOULD STORE.
    pub fn check_tunable(&self, key: TunableKey, value: u64) -> Result<u64, ConfigError> {
        let _st = lock(&self.state);
        self.tunables.validate(key, value, &self.table)
    }

    pub fn set_tunable_by_name(&self, name: &str, value: u64) -> Result<(), ConfigError> {
        self.set_tunable(TunableKey::from_name(name)?, value)
    }

    // KERNEL-SIDE HALF OF THE ADAPTIVE BAND (0/0 CLEARS IT)
    pub fn set_kernel_adaptive(&self, low: u64, high: u64) -> Result<(), ConfigError> {
        let _st = lock(&self.state);
        let low = tuning::snap_up(low, &self.table);
        let high = tuning::snap_up(high, &self.table);
        tuning::check_band(
            low.max(self.tunables.raw(TunableKey::AdaptiveLowFreq)),
            high.max(self.tunables.raw(TunableKey::AdaptiveHighFreq)),
        )?;
        self.tunables.store_kernel_adaptive(low, high);
        self.limits_changed.store(true, Ordering::Release);
        debug!(domain = self.id, low, high, "kernel adaptive band updated");
        Ok(())
    }

    // --- QUERIES ---

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn cpus(&self) -> &[usize] {
        &self.cpus
    }

    pub fn table(&self) -> &FreqTable {
        &self.table
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn current_frequency(&self) -> u64 {
        lock(&self.state).current_freq
    }

    pub fn next_frequency(&self) -> u64 {
        lock(&self.state).next_freq
    }

    pub fn heaviest_cpu(&self) -> usize {
        lock(&self.state).heaviest_cpu
    }

    pub fn work_in_progress(&self) -> bool {
        lock(&self.state).work_in_progress
    }

    // LAST SELECTED (FREQUENCY, REASON), COMMITTED OR NOT
    pub fn last_decision(&self) -> Option<(u64, BoostReason)> {
        lock(&self.state).decision
    }

    pub fn stats(&self) -> DomainStats {
        let st = lock(&self.state);
        DomainStats {
            updates: self.updates.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            ..st.stats
        }
    }

    pub fn cpu_state(&self, cpu: usize) -> Option<CpuState> {
        self.slot(cpu).map(|slot| *lock(&self.cpu_states[slot]))
    }

    // CPU RUNS ABOVE WHAT THE DOMAIN MIN FREQUENCY PROVIDES: IF IT GOES IDLE
    // THE HOST SHOULD ARM A TIMER SO THE DOMAIN CAN STILL COME DOWN
    pub fn needs_slack_timer(&self, cpu: usize) -> bool {
        self.cpu_state(cpu)
            .map(|c| c.util > c.min_capacity_floor)
            .unwrap_or(false)
    }

    pub fn with_log<R>(&self, f: impl FnOnce(&EventLog) -> R) -> R {
        f(&lock(&self.state).log)
    }

    fn slot(&self, cpu: usize) -> Option<usize> {
        self.cpus.iter().position(|&c| c == cpu)
    }
}

impl Drop for PolicyDomain {
    fn drop(&mut self) {
        // CLOSING THE DOORBELL ENDS A WORKER THAT WAS NEVER JOINED
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        st.doorbell = None;
    }
}
