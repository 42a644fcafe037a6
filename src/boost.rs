// FREQCTL BOOST RESOLVER
// PURE FUNCTIONS: RAW UTILIZATION + PER-CPU BOOST INPUTS -> BOOSTED UTILIZATION
// AND THE SOURCE THAT WON. NO STATE, NO LOCKS.

use crate::tuning::freq_to_capacity;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BoostReason {
    #[default]
    None = 0,
    RawUtilization = 1,
    IoWait = 2,
    ExplicitTaskBoost = 3,
    HeavyTask = 4,
    MarginBoost = 5,
    Clamp = 6,
    Ceiling = 7,
    AdaptiveLow = 8,
    AdaptiveHigh = 9,
    ExternalLimitsChange = 10,
}

impl BoostReason {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::RawUtilization,
            2 => Self::IoWait,
            3 => Self::ExplicitTaskBoost,
            4 => Self::HeavyTask,
            5 => Self::MarginBoost,
            6 => Self::Clamp,
            7 => Self::Ceiling,
            8 => Self::AdaptiveLow,
            9 => Self::AdaptiveHigh,
            10 => Self::ExternalLimitsChange,
            _ => Self::None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::RawUtilization => "UTIL",
            Self::IoWait => "IOWAIT",
            Self::ExplicitTaskBoost => "BOOST",
            Self::HeavyTask => "HEAVY",
            Self::MarginBoost => "MARGIN",
            Self::Clamp => "CLAMP",
            Self::Ceiling => "CEILING",
            Self::AdaptiveLow => "ADAPT_LO",
            Self::AdaptiveHigh => "ADAPT_HI",
            Self::ExternalLimitsChange => "LIMITS",
        }
    }
}

// HEAVY-TASK PARAMETERS, RESOLVED PER DOMAIN FROM THE TUNABLES
#[derive(Clone, Copy, Debug, Default)]
pub struct HeavyParams {
    pub margin_pct: u64,
    // FREQUENCY THE HEAVY TASK MUST NEVER RUN BELOW (0 = NO FLOOR)
    pub min_freq: u64,
    pub max_freq: u64,
}

// TASK LOAD PLUS MARGIN, FLOORED AT THE CAPACITY OF heavy_min_freq
pub fn effective_heavy_task_load(load: u64, max_capacity: u64, p: &HeavyParams) -> u64 {
    let boosted = load.saturating_add(load.saturating_mul(p.margin_pct) / 100);
    let floor = if p.min_freq > 0 {
        freq_to_capacity(p.min_freq, p.max_freq, max_capacity)
    } else {
        0
    };
    boosted.max(floor)
}

pub fn margin_util(util: u64, margin_pct: u64) -> u64 {
    util.saturating_add(util.saturating_mul(margin_pct) / 100)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BoostInputs {
    pub util: u64,
    pub max_capacity: u64,
    // RESULT OF THE EXTERNAL BOOST POLICY, 0 = NO REQUEST
    pub explicit_boost: u64,
    // LOAD OF THE CPU'S DOMINANT RUNNABLE TASK, IF ANY
    pub heavy_load: Option<u64>,
    pub margin_pct: u64,
    pub margin_boost: bool,
}

// RESOLVE THE MAXIMUM BOOSTED UTILIZATION.
// CANDIDATES IN LISTED ORDER, EACH REPLACES THE RUNNING MAX ONLY IF STRICTLY
// GREATER (TIES GO TO THE EARLIER SOURCE). MARGIN-BOOST MODE MAKES THE MARGIN
// CANDIDATE AN OVERRIDE SO THE CONFIGURED FLOOR ALWAYS HOLDS.
pub fn resolve_boost(inp: &BoostInputs, heavy: &HeavyParams) -> (u64, BoostReason) {
    let mut best = (0u64, BoostReason::None);

    if inp.explicit_boost > best.0 {
        best = (inp.explicit_boost, BoostReason::ExplicitTaskBoost);
    }

    if let Some(load) = inp.heavy_load {
        let h = effective_heavy_task_load(load, inp.max_capacity, heavy);
        if h > best.0 {
            best = (h, BoostReason::HeavyTask);
        }
    }

    if inp.margin_boost || inp.margin_pct > 0 {
        let m = margin_util(inp.util, inp.margin_pct);
        if inp.margin_boost || m > best.0 {
            best = (m, BoostReason::MarginBoost);
        }
    }

    if inp.util > best.0 {
        best = (inp.util, BoostReason::RawUtilization);
    }

    best
}
