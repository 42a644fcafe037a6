// FREQCTL -- PER-CLUSTER CPU FREQUENCY CONTROL LOOP
// SCHEDULER-DRIVEN: EVERY UTILIZATION UPDATE MAY PICK A NEW OPERATING POINT
// FOR THE CPU'S POLICY DOMAIN. PURE-RUST CORE, LINUX BACKEND IN sysfs.

pub mod boost;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod event;
pub mod freq_table;
pub mod governor;
pub mod hooks;
pub mod iowait;
pub mod ratelimit;
pub mod sysfs;
pub mod tuning;

pub use domain::{CpuState, DomainConfig, DomainStats, PolicyDomain};
pub use error::ConfigError;
pub use governor::Governor;
pub use ratelimit::UpdateFlags;
