// FREQCTL RATE LIMITER
// TWO-STAGE GATE. RECOMPUTE GATE STOPS UPDATE STORMS (EVERY TICK),
// POSTPONE GATE STOPS CHATTER (ONE TABLE STEP BACK AND FORTH).
// LARGE JUMPS AND LONG WAITS OVERRIDE THE DAMPING SO SPIKES STILL LAND FAST.

use crate::freq_table::FreqTable;
use crate::tuning::MAX_DELAY_PERIODS;

// UPDATE EVENT FLAGS (SET BY THE HOST SCHEDULER)

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct UpdateFlags(u32);

impl UpdateFlags {
    pub const NONE: Self           = Self(0);
    pub const IO_WAIT: Self        = Self(1 << 0);  // TASK WOKE FROM I/O
    pub const HEAVY_TASK: Self     = Self(1 << 1);  // HEAVY TASK BECAME RUNNABLE
    pub const EXPLICIT_BOOST: Self = Self(1 << 2);  // EXTERNAL BOOST REQUESTED

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for UpdateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RateLimits {
    pub up_ns: u64,
    pub down_ns: u64,
    pub heavy_rampup_ns: u64,
    pub boost_rampup_ns: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Recompute {
    Skip,
    Normal,
    // RATE LIMIT BYPASSED BY A BOOST FLAG: NO POSTPONEMENT THIS CYCLE
    QuickRampup,
}

// RECOMPUTE GATE. THE limits_changed CASE IS HANDLED BY THE CALLER
// (IT OWNS THE FLAG AND MUST CLEAR IT).
pub fn should_recompute(elapsed_ns: u64, limits: &RateLimits, flags: UpdateFlags) -> Recompute {
    if elapsed_ns >= limits.up_ns.min(limits.down_ns) {
        return Recompute::Normal;
    }
    if flags.contains(UpdateFlags::HEAVY_TASK) && elapsed_ns > limits.heavy_rampup_ns {
        return Recompute::QuickRampup;
    }
    if flags.contains(UpdateFlags::EXPLICIT_BOOST) && elapsed_ns > limits.boost_rampup_ns {
        return Recompute::QuickRampup;
    }
    Recompute::Skip
}

// ELAPSED TIME IN WHOLE DELAY PERIODS (ROUNDED), CAPPED
pub fn delay_periods(elapsed_ns: u64, period_ns: u64) -> u64 {
    if period_ns == 0 {
        return MAX_DELAY_PERIODS;
    }
    let periods = elapsed_ns.saturating_add(period_ns / 2) / period_ns;
    periods.min(MAX_DELAY_PERIODS)
}

#[derive(Clone, Copy, Debug)]
pub struct PostponeInputs {
    pub elapsed_ns: u64,
    pub target: u64,
    pub current: u64,
    pub up_ns: u64,
    pub period_ns: u64,
    pub forced: bool,
}

// POSTPONE GATE. APPLIED AFTER A CANDIDATE TARGET EXISTS.
pub fn should_postpone(p: &PostponeInputs, table: &FreqTable) -> bool {
    if p.forced {
        return false;
    }
    if p.target > p.current {
        return p.elapsed_ns < p.up_ns;
    }
    let periods = delay_periods(p.elapsed_ns, p.period_ns);
    let steps = table.step_distance(p.current, p.target) as u64;
    steps <= MAX_DELAY_PERIODS - periods
}
