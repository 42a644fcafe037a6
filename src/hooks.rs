// FREQCTL EXTERNAL COLLABORATORS
// THE CONTROL LOOP CONSUMES THESE AT ITS BOUNDARY AND TREATS THEM AS BLACK BOXES:
//   UtilizationSource: ONE SAMPLE PER UPDATE EVENT
//   FreqCommitter:     THE HARDWARE COMMIT (SYNC FAST PATH / BLOCKING SLOW PATH)
//   PolicyHooks:       EXTERNAL BOOST, CEILING, WALL, BANDWIDTH FLOOR

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskRef {
    pub pid: u32,
    pub load: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UtilSample {
    pub util: u64,
    pub capacity: u64,
    pub io_wait: bool,
    pub heavy_task: Option<TaskRef>,
}

pub trait UtilizationSource: Send + Sync {
    fn sample(&self, cpu: usize) -> UtilSample;
}

pub trait FreqCommitter: Send + Sync {
    // TRUE IF commit_sync IS GUARANTEED NOT TO BLOCK. SELECTS THE FAST PATH.
    fn fast_switch(&self) -> bool {
        false
    }

    // CALLED WITH THE DOMAIN LOCK HELD. ONLY USED WHEN fast_switch() IS TRUE.
    fn commit_sync(&self, domain: usize, freq: u64) {
        self.commit_blocking(domain, freq);
    }

    // CALLED ONLY FROM THE DOMAIN'S WORKER THREAD, OUTSIDE THE LOCK. MAY BLOCK.
    fn commit_blocking(&self, domain: usize, freq: u64);
}

pub trait PolicyHooks: Send + Sync {
    fn external_boost(&self, _cpu: usize, _util: u64) -> u64 {
        0
    }

    fn apply_ceiling(&self, _domain: usize, freq: u64) -> u64 {
        freq
    }

    fn wall(&self, _domain: usize) -> Option<u64> {
        None
    }

    // A RISE IN THIS VALUE FORCES AN IMMEDIATE RECOMPUTE
    fn bandwidth_floor(&self, _cpu: usize) -> u64 {
        0
    }
}

pub struct NoHooks;

impl PolicyHooks for NoHooks {}
