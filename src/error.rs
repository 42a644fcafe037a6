// FREQCTL CONFIGURATION ERRORS
// THE ONLY ERRORS THE LIBRARY SURFACES. THE PER-EVENT CONTROL LOOP NEVER
// RETURNS ONE: A BAD SAMPLE OR A LOST RACE JUST KEEPS THE OLD FREQUENCY.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("frequency table is empty")]
    EmptyFreqTable,

    #[error("frequency table contains a zero entry")]
    ZeroFrequency,

    #[error("policy domain {0} has no cpus")]
    EmptyDomain(usize),

    #[error("cpu {0} is already owned by another policy domain")]
    CpuAlreadyOwned(usize),

    #[error("adaptive band inverted: low {low} > high {high}")]
    AdaptiveBandInverted { low: u64, high: u64 },

    #[error("scaling limits inverted: min {min} > max {max}")]
    LimitsInverted { min: u64, max: u64 },

    #[error("unknown tunable '{0}'")]
    UnknownTunable(String),

    #[error("tunable {name}: value {value} out of range (max {max})")]
    OutOfRange { name: &'static str, value: u64, max: u64 },

    #[error("policy domain {0}: failed to spawn worker: {1}")]
    WorkerSpawn(usize, String),
}
