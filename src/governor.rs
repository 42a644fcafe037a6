// FREQCTL GOVERNOR
// OWNS EVERY POLICY DOMAIN: BUILD, ROUTE PER-CPU UPDATES, MONITOR, SHUTDOWN.
// THE CPU -> DOMAIN MAP IS FIXED AT BUILD TIME AND READ WITHOUT LOCKING.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::domain::{DomainConfig, DomainStats, PolicyDomain};
use crate::error::ConfigError;
use crate::hooks::{FreqCommitter, PolicyHooks, UtilizationSource};
use crate::ratelimit::UpdateFlags;
use crate::tuning::TunableKey;

pub struct Governor {
    domains: Vec<Arc<PolicyDomain>>,
    // INDEXED BY CPU, VALUE IS AN INDEX INTO domains
    cpu_map: Vec<Option<usize>>,
}

impl Governor {
    pub fn build(
        configs: Vec<DomainConfig>,
        source: Arc<dyn UtilizationSource>,
        committer: Arc<dyn FreqCommitter>,
        hooks: Arc<dyn PolicyHooks>,
    ) -> Result<Self, ConfigError> {
        // REJECT SHARED CPUS BEFORE ANY WORKER IS SPAWNED
        Self::map_cpus(configs.iter().map(|c| c.cpus.as_slice()))?;

        let mut domains = Vec::with_capacity(configs.len());
        for cfg in configs {
            let d = PolicyDomain::new(cfg, source.clone(), committer.clone(), hooks.clone())?;
            domains.push(d);
        }
        Self::from_domains(domains)
    }

    pub fn from_domains(domains: Vec<Arc<PolicyDomain>>) -> Result<Self, ConfigError> {
        let cpu_map = Self::map_cpus(domains.iter().map(|d| d.cpus()))?;
        info!(domains = domains.len(), cpus = cpu_map.iter().flatten().count(), "governor ready");
        Ok(Self { domains, cpu_map })
    }

    fn map_cpus<'a>(sets: impl Iterator<Item = &'a [usize]>) -> Result<Vec<Option<usize>>, ConfigError> {
        let mut map: Vec<Option<usize>> = Vec::new();
        for (idx, cpus) in sets.enumerate() {
            for &cpu in cpus {
                if cpu >= map.len() {
                    map.resize(cpu + 1, None);
                }
                if map[cpu].is_some() {
                    return Err(ConfigError::CpuAlreadyOwned(cpu));
                }
                map[cpu] = Some(idx);
            }
        }
        Ok(map)
    }

    pub fn domains(&self) -> &[Arc<PolicyDomain>] {
        &self.domains
    }

    pub fn domain_for(&self, cpu: usize) -> Option<&Arc<PolicyDomain>> {
        let idx = (*self.cpu_map.get(cpu)?)?;
        self.domains.get(idx)
    }

    pub fn nr_cpus(&self) -> usize {
        self.cpu_map.iter().flatten().count()
    }

    // HOT PATH. CPUS OUTSIDE EVERY DOMAIN ARE DROPPED.
    pub fn on_utilization_update(&self, cpu: usize, now: u64, flags: UpdateFlags) {
        if let Some(d) = self.domain_for(cpu) {
            d.on_utilization_update(cpu, now, flags);
        }
    }

    // APPLY TO EVERY DOMAIN OR TO NONE: ALL DOMAINS VALIDATE BEFORE ANY STORES
    pub fn set_tunable(&self, key: TunableKey, value: u64) -> Result<(), ConfigError> {
        for d in &self.domains {
            d.check_tunable(key, value)?;
        }
        for d in &self.domains {
            d.set_tunable(key, value)?;
        }
        Ok(())
    }

    pub fn total_stats(&self) -> DomainStats {
        let mut total = DomainStats::default();
        for d in &self.domains {
            let s = d.stats();
            total.updates += s.updates;
            total.contended += s.contended;
            total.rate_limited += s.rate_limited;
            total.recomputes += s.recomputes;
            total.quick_rampups += s.quick_rampups;
            total.postponed += s.postponed;
            total.commits += s.commits;
            total.requests += s.requests;
            total.coalesced += s.coalesced;
            total.worker_commits += s.worker_commits;
        }
        total
    }

    // ONE TELEMETRY LINE PER INTERVAL UNTIL SHUTDOWN
    pub fn monitor(&self, shutdown: &AtomicBool, interval: Duration, verbose: bool) {
        let mut prev = self.total_stats();

        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(interval);

            let stats = self.total_stats();
            let freqs: Vec<String> = self
                .domains
                .iter()
                .map(|d| format!("p{}={}", d.id(), d.current_frequency()))
                .collect();

            println!("updates: {:<8} recomputes: {:<6} limited: {:<6} postponed: {:<6} contended: {:<6} commits: {:<6} coalesced: {:<6} freq: {}",
                stats.updates - prev.updates,
                stats.recomputes - prev.recomputes,
                stats.rate_limited - prev.rate_limited,
                stats.postponed - prev.postponed,
                stats.contended - prev.contended,
                stats.commits - prev.commits,
                stats.coalesced - prev.coalesced,
                freqs.join(" "));

            if verbose {
                for d in &self.domains {
                    if let Some((freq, reason)) = d.last_decision() {
                        println!("  POLICY {} last={} reason={} heaviest=cpu{} path={}",
                            d.id(), freq, reason.label(), d.heaviest_cpu(), d.mode().label());
                    }
                }
            }

            prev = stats;
        }
    }

    // DETACH EVERYTHING FIRST, THEN WAIT FOR THE WORKERS
    pub fn shutdown(&self) {
        for d in &self.domains {
            d.detach();
        }
        for d in &self.domains {
            d.join_worker();
        }
        info!(commits = self.total_stats().commits, "governor stopped");
    }

    pub fn dump_logs(&self) {
        for d in &self.domains {
            d.with_log(|log| log.dump(d.id()));
        }
    }

    pub fn summaries(&self) {
        for d in &self.domains {
            d.with_log(|log| log.summary(d.id()));
        }
    }
}
