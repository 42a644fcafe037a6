// FREQCTL TUNING TYPES
// PURE-RUST MODULE: DEFAULTS, THE TUNABLE SURFACE, FREQUENCY-DEPENDENT TIERS
// SHARED BETWEEN THE DOMAIN CONTROLLER, THE CLI AND THE OFFLINE TESTS

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ConfigError;
use crate::freq_table::FreqTable;

// CAPACITY SCALE
// UTILIZATION AND CAPACITY ARE NORMALIZED SO THE BIGGEST CPU IS 1024.

pub const CAPACITY_SCALE: u64 = 1024;
pub const IO_BOOST_MIN: u64   = CAPACITY_SCALE / 8;  // FIRST I/O WAKE STARTS AT 128

// TIME BASE

pub const DEFAULT_TICK_NS: u64 = 4_000_000;  // 4MS: ONE SCHEDULER TICK AT HZ=250
pub const MAX_DELAY_PERIODS: u64 = 4;        // DOWNWARD DAMPING HORIZON, IN TICKS

// RATE LIMITS
// LOW TIER REACTS FAST, HIGH TIER HOLDS LONGER (EXPENSIVE OPERATING POINTS)

pub const DEFAULT_UP_RATE_LIMIT_NS: u64      = 1_000_000;   // 1MS
pub const DEFAULT_DOWN_RATE_LIMIT_NS: u64    = 4_000_000;   // 4MS
pub const DEFAULT_UP_RATE_LIMIT_HI_NS: u64   = 4_000_000;   // 4MS
pub const DEFAULT_DOWN_RATE_LIMIT_HI_NS: u64 = 10_000_000;  // 10MS

// QUICK RAMPUP: MUCH SMALLER GATES FOR HIGH-PRIORITY BOOST FLAGS

pub const DEFAULT_HEAVY_RAMPUP_NS: u64 = 500_000;  // 0.5MS
pub const DEFAULT_BOOST_RAMPUP_NS: u64 = 500_000;  // 0.5MS

// MARGINS (PERCENT OF UTILIZATION ADDED AS HEADROOM)

pub const DEFAULT_MARGIN_PCT: u64       = 20;
pub const DEFAULT_MARGIN_HI_PCT: u64    = 25;
pub const DEFAULT_HEAVY_MARGIN_PCT: u64 = 25;
pub const MAX_MARGIN_PCT: u64           = 1000;

// TUNABLE SURFACE
// FIXED, COMPILE-TIME SET. RATE LIMITS ARE EXPOSED IN MICROSECONDS,
// STORED IN NANOSECONDS. FREQUENCY TUNABLES USE THE TABLE'S UNIT, 0 = OFF.

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TunableKey {
    MarginPct,
    MarginHiPct,
    UpRateLimitUs,
    DownRateLimitUs,
    UpRateLimitHiUs,
    DownRateLimitHiUs,
    TierThresholdFreq,
    HeavyRampupUs,
    BoostRampupUs,
    HeavyMarginPct,
    HeavyMinFreq,
    IoBoost,
    MarginBoost,
    AdaptiveLowFreq,
    AdaptiveHighFreq,
    ScalingMinFreq,
    ScalingMaxFreq,
}

impl TunableKey {
    pub const ALL: [TunableKey; 17] = [
        Self::MarginPct,
        Self::MarginHiPct,
        Self::UpRateLimitUs,
        Self::DownRateLimitUs,
        Self::UpRateLimitHiUs,
        Self::DownRateLimitHiUs,
        Self::TierThresholdFreq,
        Self::HeavyRampupUs,
        Self::BoostRampupUs,
        Self::HeavyMarginPct,
        Self::HeavyMinFreq,
        Self::IoBoost,
        Self::MarginBoost,
        Self::AdaptiveLowFreq,
        Self::AdaptiveHighFreq,
        Self::ScalingMinFreq,
        Self::ScalingMaxFreq,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::MarginPct => "margin_pct",
            Self::MarginHiPct => "margin_hi_pct",
            Self::UpRateLimitUs => "up_rate_limit_us",
            Self::DownRateLimitUs => "down_rate_limit_us",
            Self::UpRateLimitHiUs => "up_rate_limit_hi_us",
            Self::DownRateLimitHiUs => "down_rate_limit_hi_us",
            Self::TierThresholdFreq => "tier_threshold_freq",
            Self::HeavyRampupUs => "heavy_rampup_us",
            Self::BoostRampupUs => "boost_rampup_us",
            Self::HeavyMarginPct => "heavy_margin_pct",
            Self::HeavyMinFreq => "heavy_min_freq",
            Self::IoBoost => "io_boost",
            Self::MarginBoost => "margin_boost",
            Self::AdaptiveLowFreq => "adaptive_low_freq",
            Self::AdaptiveHighFreq => "adaptive_high_freq",
            Self::ScalingMinFreq => "scaling_min_freq",
            Self::ScalingMaxFreq => "scaling_max_freq",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == name)
            .ok_or_else(|| ConfigError::UnknownTunable(name.to_string()))
    }

    fn is_time_us(self) -> bool {
        matches!(
            self,
            Self::UpRateLimitUs
                | Self::DownRateLimitUs
                | Self::UpRateLimitHiUs
                | Self::DownRateLimitHiUs
                | Self::HeavyRampupUs
                | Self::BoostRampupUs
        )
    }

    fn is_flag(self) -> bool {
        matches!(self, Self::IoBoost | Self::MarginBoost)
    }

    fn is_pct(self) -> bool {
        matches!(self, Self::MarginPct | Self::MarginHiPct | Self::HeavyMarginPct)
    }
}

// --- SHARED STATE (ATOMICS, WRITTEN ONLY UNDER THE DOMAIN LOCK) ---

pub struct Tunables {
    values: [AtomicU64; TunableKey::ALL.len()],
    kernel_adaptive_low: AtomicU64,
    kernel_adaptive_high: AtomicU64,
}

impl Default for Tunables {
    fn default() -> Self {
        let t = Self {
            values: std::array::from_fn(|_| AtomicU64::new(0)),
            kernel_adaptive_low: AtomicU64::new(0),
            kernel_adaptive_high: AtomicU64::new(0),
        };
        t.store(TunableKey::MarginPct, DEFAULT_MARGIN_PCT);
        t.store(TunableKey::MarginHiPct, DEFAULT_MARGIN_HI_PCT);
        t.store(TunableKey::UpRateLimitUs, DEFAULT_UP_RATE_LIMIT_NS);
        t.store(TunableKey::DownRateLimitUs, DEFAULT_DOWN_RATE_LIMIT_NS);
        t.store(TunableKey::UpRateLimitHiUs, DEFAULT_UP_RATE_LIMIT_HI_NS);
        t.store(TunableKey::DownRateLimitHiUs, DEFAULT_DOWN_RATE_LIMIT_HI_NS);
        t.store(TunableKey::HeavyRampupUs, DEFAULT_HEAVY_RAMPUP_NS);
        t.store(TunableKey::BoostRampupUs, DEFAULT_BOOST_RAMPUP_NS);
        t.store(TunableKey::HeavyMarginPct, DEFAULT_HEAVY_MARGIN_PCT);
        t.store(TunableKey::IoBoost, 1);
        t
    }
}

impl Tunables {
    fn slot(key: TunableKey) -> usize {
        key as usize
    }

    // INTERNAL REPRESENTATION (RATE LIMITS IN NANOSECONDS)
    pub fn raw(&self, key: TunableKey) -> u64 {
        self.values[Self::slot(key)].load(Ordering::Relaxed)
    }

    pub(crate) fn store(&self, key: TunableKey, raw: u64) {
        self.values[Self::slot(key)].store(raw, Ordering::Relaxed);
    }

    // EXTERNAL REPRESENTATION (RATE LIMITS IN MICROSECONDS)
    pub fn get(&self, key: TunableKey) -> u64 {
        let raw = self.raw(key);
        if key.is_time_us() { raw / 1_000 } else { raw }
    }

    pub fn flag(&self, key: TunableKey) -> bool {
        self.raw(key) != 0
    }

    pub fn kernel_adaptive(&self) -> (u64, u64) {
        (
            self.kernel_adaptive_low.load(Ordering::Relaxed),
            self.kernel_adaptive_high.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn store_kernel_adaptive(&self, low: u64, high: u64) {
        self.kernel_adaptive_low.store(low, Ordering::Relaxed);
        self.kernel_adaptive_high.store(high, Ordering::Relaxed);
    }

    // EFFECTIVE BAND: MAX OF KERNEL-SET AND USER-SET FOR EACH EDGE
    pub fn adaptive_band(&self) -> (u64, u64) {
        let (k_low, k_high) = self.kernel_adaptive();
        (
            k_low.max(self.raw(TunableKey::AdaptiveLowFreq)),
            k_high.max(self.raw(TunableKey::AdaptiveHighFreq)),
        )
    }

    // SCALING LIMITS, 0 RESOLVES TO THE TABLE BOUND
    pub fn scaling_limits(&self, table: &FreqTable) -> (u64, u64) {
        let min = match self.raw(TunableKey::ScalingMinFreq) {
            0 => table.min(),
            v => v,
        };
        let max = match self.raw(TunableKey::ScalingMaxFreq) {
            0 => table.max(),
            v => v,
        };
        (min, max)
    }

    // VALIDATE AN EXTERNAL VALUE AND RETURN ITS STORED FORM.
    // FREQUENCY LIMITS ARE SNAPPED ONTO THE TABLE SO COMMITS STAY QUANTIZED.
    pub fn validate(&self, key: TunableKey, value: u64, table: &FreqTable) -> Result<u64, ConfigError> {
        let name = key.name();
        if key.is_flag() && value > 1 {
            return Err(ConfigError::OutOfRange { name, value, max: 1 });
        }
        if key.is_pct() && value > MAX_MARGIN_PCT {
            return Err(ConfigError::OutOfRange { name, value, max: MAX_MARGIN_PCT });
        }
        if key.is_time_us() {
            let max = u64::MAX / 1_000;
            if value > max {
                return Err(ConfigError::OutOfRange { name, value, max });
            }
            return Ok(value * 1_000);
        }

        let (k_low, k_high) = self.kernel_adaptive();
        match key {
            TunableKey::AdaptiveLowFreq => {
                let value = snap_up(value, table);
                let high = k_high.max(self.raw(TunableKey::AdaptiveHighFreq));
                check_band(k_low.max(value), high)?;
                Ok(value)
            }
            TunableKey::AdaptiveHighFreq => {
                let value = snap_up(value, table);
                let low = k_low.max(self.raw(TunableKey::AdaptiveLowFreq));
                check_band(low, k_high.max(value))?;
                Ok(value)
            }
            TunableKey::ScalingMinFreq => {
                let (_, max) = self.scaling_limits(table);
                let min = if value == 0 { table.min() } else { table.ceil(value) };
                if min > max {
                    return Err(ConfigError::LimitsInverted { min, max });
                }
                Ok(if value == 0 { 0 } else { min })
            }
            TunableKey::ScalingMaxFreq => {
                let (min, _) = self.scaling_limits(table);
                let max = if value == 0 { table.max() } else { table.floor(value) };
                if min > max {
                    return Err(ConfigError::LimitsInverted { min, max });
                }
                Ok(if value == 0 { 0 } else { max })
            }
            _ => Ok(value),
        }
    }
}

// 0 STAYS 0 (DISABLED), ANYTHING ELSE ROUNDS UP TO A TABLE ENTRY
pub fn snap_up(value: u64, table: &FreqTable) -> u64 {
    if value == 0 { 0 } else { table.ceil(value) }
}

pub fn check_band(low: u64, high: u64) -> Result<(), ConfigError> {
    if high > 0 && low > high {
        return Err(ConfigError::AdaptiveBandInverted { low, high });
    }
    Ok(())
}

// FREQUENCY-DEPENDENT TIER
// BELOW THE THRESHOLD: SMALLER MARGIN, FASTER LIMITS. AT OR ABOVE: LARGER
// MARGIN, SLOWER LIMITS. THRESHOLD 0 DISABLES THE HIGH TIER.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TierParams {
    pub margin_pct: u64,
    pub up_rate_limit_ns: u64,
    pub down_rate_limit_ns: u64,
}

pub fn tier_params(t: &Tunables, target_freq: u64) -> TierParams {
    let threshold = t.raw(TunableKey::TierThresholdFreq);
    if threshold > 0 && target_freq >= threshold {
        TierParams {
            margin_pct: t.raw(TunableKey::MarginHiPct),
            up_rate_limit_ns: t.raw(TunableKey::UpRateLimitHiUs),
            down_rate_limit_ns: t.raw(TunableKey::DownRateLimitHiUs),
        }
    } else {
        TierParams {
            margin_pct: t.raw(TunableKey::MarginPct),
            up_rate_limit_ns: t.raw(TunableKey::UpRateLimitUs),
            down_rate_limit_ns: t.raw(TunableKey::DownRateLimitUs),
        }
    }
}

// CAPACITY THAT RUNNING AT `freq` PROVIDES ON A CPU OF `max_capacity`
pub fn freq_to_capacity(freq: u64, max_freq: u64, max_capacity: u64) -> u64 {
    if max_freq == 0 {
        return 0;
    }
    ((freq as u128 * max_capacity as u128) / max_freq as u128).min(max_capacity as u128) as u64
}

// TICK FOR A HOST THAT SLEEPS `interval_ns` BETWEEN UPDATES. UPDATES LAND
// SLIGHTLY PAST THE INTERVAL, SO A TICK EQUAL TO IT MAKES EVERY UPDATE STALE.
pub fn tick_for_interval(interval_ns: u64) -> u64 {
    interval_ns.saturating_mul(2).max(1)
}
