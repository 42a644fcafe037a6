// FREQCTL LINUX BACKEND
// CPUFREQ POLICY DISCOVERY, /proc/stat UTILIZATION SOURCE, scaling_setspeed
// COMMITTER. WRITING A SPEED REQUIRES THE userspace GOVERNOR ON THE POLICY.
//
// ALL PATHS ARE ROOTED SO TESTS CAN POINT THEM AT A FAKE TREE.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::domain::lock;
use crate::hooks::{FreqCommitter, UtilSample, UtilizationSource};
use crate::tuning::CAPACITY_SCALE;

pub const CPUFREQ_ROOT: &str = "/sys/devices/system/cpu/cpufreq";
pub const CPU_ROOT: &str = "/sys/devices/system/cpu";
pub const PROC_STAT: &str = "/proc/stat";

// --- POLICY DISCOVERY ---

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyInfo {
    pub id: usize,
    pub cpus: Vec<usize>,
    pub freqs: Vec<u64>,
    pub cur_freq: Option<u64>,
    pub governor: String,
}

// "0-3,6,8-9" -> [0, 1, 2, 3, 6, 8, 9]
pub fn parse_cpu_list(s: &str) -> Result<Vec<usize>> {
    let re = Regex::new(r"^(\d+)(?:-(\d+))?$")?;
    let mut cpus = Vec::new();
    for item in s.trim().split(',').filter(|i| !i.is_empty()) {
        let caps = re
            .captures(item.trim())
            .with_context(|| format!("bad cpu list item '{}'", item))?;
        let lo: usize = caps[1].parse()?;
        let hi: usize = match caps.get(2) {
            Some(m) => m.as_str().parse()?,
            None => lo,
        };
        if hi < lo {
            bail!("inverted cpu range '{}'", item);
        }
        cpus.extend(lo..=hi);
    }
    Ok(cpus)
}

fn read_trimmed(path: &Path) -> Result<String> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(s.trim().to_string())
}

fn read_u64(path: &Path) -> Result<u64> {
    let s = read_trimmed(path)?;
    s.parse()
        .with_context(|| format!("{}: not a number '{}'", path.display(), s))
}

pub fn read_policy(dir: &Path, id: usize) -> Result<PolicyInfo> {
    // related_cpus INCLUDES OFFLINE CPUS, affected_cpus DOES NOT
    let cpus = match read_trimmed(&dir.join("related_cpus")) {
        Ok(s) => parse_cpu_list(&s.replace(' ', ","))?,
        Err(_) => parse_cpu_list(&read_trimmed(&dir.join("affected_cpus"))?.replace(' ', ","))?,
    };

    // NO FREQUENCY TABLE EXPORTED: FALL BACK TO THE HARDWARE RANGE
    let freqs = match read_trimmed(&dir.join("scaling_available_frequencies")) {
        Ok(s) => s
            .split_whitespace()
            .map(|f| f.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("policy{}: bad frequency table", id))?,
        Err(_) => vec![
            read_u64(&dir.join("cpuinfo_min_freq"))?,
            read_u64(&dir.join("cpuinfo_max_freq"))?,
        ],
    };

    Ok(PolicyInfo {
        id,
        cpus,
        freqs,
        cur_freq: read_u64(&dir.join("scaling_cur_freq")).ok(),
        governor: read_trimmed(&dir.join("scaling_governor")).unwrap_or_default(),
    })
}

// EVERY policyN DIRECTORY UNDER root, SORTED BY N
pub fn discover_policies(root: &Path) -> Result<Vec<PolicyInfo>> {
    let re = Regex::new(r"^policy(\d+)$")?;
    let mut policies = Vec::new();
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("failed to list {}", root.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(caps) = name.to_str().and_then(|n| re.captures(n)) else {
            continue;
        };
        let id: usize = caps[1].parse()?;
        let info = read_policy(&entry.path(), id)?;
        debug!(policy = id, cpus = ?info.cpus, steps = info.freqs.len(), "policy discovered");
        policies.push(info);
    }
    policies.sort_by_key(|p| p.id);
    if policies.is_empty() {
        bail!("no cpufreq policies under {}", root.display());
    }
    Ok(policies)
}

// cpu_capacity IS ONLY EXPORTED ON ASYMMETRIC SYSTEMS. ABSENT MEANS FULL SCALE.
pub fn read_cpu_capacity(cpu_root: &Path, cpu: usize) -> u64 {
    read_u64(&cpu_root.join(format!("cpu{}", cpu)).join("cpu_capacity")).unwrap_or(CAPACITY_SCALE)
}

// --- /proc/stat UTILIZATION ---

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub iowait: u64,
    pub total: u64,
}

// FIELDS: user nice system idle iowait irq softirq steal ...
pub fn parse_stat_line(line: &str) -> Option<(usize, CpuTimes)> {
    let mut fields = line.split_whitespace();
    let cpu: usize = fields.next()?.strip_prefix("cpu")?.parse().ok()?;
    let vals: Vec<u64> = fields.take(8).filter_map(|v| v.parse().ok()).collect();
    if vals.len() < 5 {
        return None;
    }
    let total: u64 = vals.iter().sum();
    let idle = vals[3];
    let iowait = vals[4];
    Some((cpu, CpuTimes { busy: total - idle - iowait, iowait, total }))
}

pub struct ProcStatSource {
    path: PathBuf,
    capacities: Vec<u64>,
    prev: Mutex<Vec<CpuTimes>>,
}

impl ProcStatSource {
    pub fn new(path: impl Into<PathBuf>, capacities: Vec<u64>) -> Self {
        let n = capacities.len();
        Self {
            path: path.into(),
            capacities,
            prev: Mutex::new(vec![CpuTimes::default(); n]),
        }
    }

    fn read(&self, cpu: usize) -> Option<CpuTimes> {
        let stat = std::fs::read_to_string(&self.path).ok()?;
        stat.lines()
            .filter_map(parse_stat_line)
            .find(|(c, _)| *c == cpu)
            .map(|(_, t)| t)
    }
}

impl UtilizationSource for ProcStatSource {
    // UTILIZATION OVER THE WINDOW SINCE THIS CPU'S PREVIOUS SAMPLE
    fn sample(&self, cpu: usize) -> UtilSample {
        let capacity = self.capacities.get(cpu).copied().unwrap_or(CAPACITY_SCALE);
        let Some(now) = self.read(cpu) else {
            return UtilSample { capacity, ..Default::default() };
        };

        let mut prev = lock(&self.prev);
        if cpu >= prev.len() {
            prev.resize(cpu + 1, CpuTimes::default());
        }
        let last = std::mem::replace(&mut prev[cpu], now);
        drop(prev);

        let total = now.total.saturating_sub(last.total);
        if total == 0 {
            return UtilSample { capacity, ..Default::default() };
        }
        let busy = now.busy.saturating_sub(last.busy);
        UtilSample {
            util: (busy * capacity / total).min(capacity),
            capacity,
            io_wait: now.iowait > last.iowait,
            heavy_task: None,
        }
    }
}

// --- scaling_setspeed COMMITTER ---

// SYSFS WRITES CAN BLOCK: SLOW PATH ONLY
pub struct SysfsCommitter {
    root: PathBuf,
}

impl SysfsCommitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn write(&self, policy: usize, freq: u64) -> Result<()> {
        let path = self.root.join(format!("policy{}", policy)).join("scaling_setspeed");
        std::fs::write(&path, freq.to_string())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

impl FreqCommitter for SysfsCommitter {
    fn commit_blocking(&self, domain: usize, freq: u64) {
        if let Err(e) = self.write(domain, freq) {
            warn!(domain, freq, "commit failed: {:#}", e);
        }
    }
}

// DRY RUN: LOGS WHAT WOULD HAVE BEEN WRITTEN
pub struct DryRunCommitter;

impl FreqCommitter for DryRunCommitter {
    fn fast_switch(&self) -> bool {
        true
    }

    fn commit_blocking(&self, domain: usize, freq: u64) {
        debug!(domain, freq, "dry run commit");
    }
}
