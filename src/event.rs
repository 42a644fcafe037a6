// FREQCTL COMMIT LOG
// RECORDS EVERY DISPATCHED FREQUENCY DECISION OF ONE POLICY DOMAIN.
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION ON THE FAST PATH.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use std::collections::BTreeMap;

use crate::boost::BoostReason;

const MAX_SNAPSHOTS: usize = 4096;

#[derive(Clone, Copy, Default)]
pub struct Snapshot {
    pub ts_ns:  u64,
    pub freq:   u64,
    pub util:   u64,
    pub cpu:    usize,
    pub reason: BoostReason,
    pub fast:   bool,
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Snapshot::default(); MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    // RECORD ONE DISPATCH. CALLED UNDER THE DOMAIN LOCK.
    pub fn record(&mut self, snap: Snapshot) {
        self.snapshots[self.head] = snap;
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn last(&self) -> Option<&Snapshot> {
        if self.len == 0 {
            return None;
        }
        Some(&self.snapshots[(self.head + MAX_SNAPSHOTS - 1) % MAX_SNAPSHOTS])
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    // DUMP THE DECISION SERIES AFTER EXECUTION
    pub fn dump(&self, domain: usize) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\nPOLICY {}", domain);
        println!("{:<10} {:<10} {:<8} {:<6} {:<10} {:<6}",
            "TIME_S", "FREQ", "UTIL", "CPU", "REASON", "PATH");
        println!("{}", "-".repeat(56));

        for s in std::iter::once(first).chain(iter) {
            let elapsed_s = s.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.3} {:<10} {:<8} {:<6} {:<10} {:<6}",
                elapsed_s, s.freq, s.util, s.cpu, s.reason.label(),
                if s.fast { "FAST" } else { "SLOW" });
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} COMMITS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL COMMITS: {}", self.len);
    }

    // PER-FREQUENCY AND PER-REASON COUNTS, ASCENDING
    pub fn histograms(&self) -> (BTreeMap<u64, u64>, BTreeMap<u8, u64>) {
        let mut by_freq = BTreeMap::new();
        let mut by_reason = BTreeMap::new();
        for s in self.iter_chronological() {
            *by_freq.entry(s.freq).or_insert(0) += 1;
            *by_reason.entry(s.reason as u8).or_insert(0) += 1;
        }
        (by_freq, by_reason)
    }

    // SUMMARY STATISTICS
    pub fn summary(&self, domain: usize) {
        if self.len < 2 {
            return;
        }

        let snapshots: Vec<&Snapshot> = self.iter_chronological().collect();
        let (by_freq, by_reason) = self.histograms();

        let elapsed_ns = snapshots[snapshots.len() - 1].ts_ns.saturating_sub(snapshots[0].ts_ns);
        let elapsed_s = elapsed_ns as f64 / 1_000_000_000.0;
        let fast = snapshots.iter().filter(|s| s.fast).count();

        println!("\n{}", "=".repeat(50));
        println!("FREQCTL SUMMARY (POLICY {})", domain);
        println!("{}", "=".repeat(50));
        println!("  COMMITS:           {} (fast {} / slow {})", self.len, fast, self.len - fast);
        if elapsed_s > 0.0 {
            println!("  COMMITS/S:         {:.1}", self.len as f64 / elapsed_s);
        }
        println!("  FREQUENCY MIX:");
        for (freq, count) in &by_freq {
            println!("    {:<10} {:.1}%", freq, *count as f64 * 100.0 / self.len as f64);
        }
        println!("  REASON MIX:");
        for (reason, count) in &by_reason {
            println!("    {:<10} {:.1}%", BoostReason::from_u8(*reason).label(),
                *count as f64 * 100.0 / self.len as f64);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

// CLOCK_MONOTONIC IN NANOSECONDS. TIMESTAMP SOURCE FOR UPDATE EVENTS.
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
