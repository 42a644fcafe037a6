// FREQCTL FREQUENCY TABLE
// SORTED, DEDUPLICATED SET OF FREQUENCIES SUPPORTED BY ONE POLICY DOMAIN.
// NON-EMPTY BY CONSTRUCTION: EVERY LOOKUP RESOLVES TO A REAL ENTRY.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ConfigError;

#[derive(Debug)]
pub struct FreqTable {
    freqs: Vec<u64>,
    // DIAGNOSTIC: NUMBER OF VALUE LOOKUPS SERVED (ceil/floor)
    lookups: AtomicU64,
}

impl FreqTable {
    pub fn new(mut freqs: Vec<u64>) -> Result<Self, ConfigError> {
        if freqs.is_empty() {
            return Err(ConfigError::EmptyFreqTable);
        }
        if freqs.contains(&0) {
            return Err(ConfigError::ZeroFrequency);
        }
        freqs.sort_unstable();
        freqs.dedup();
        Ok(Self { freqs, lookups: AtomicU64::new(0) })
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn min(&self) -> u64 {
        self.freqs[0]
    }

    pub fn max(&self) -> u64 {
        self.freqs[self.freqs.len() - 1]
    }

    pub fn get(&self, idx: usize) -> Option<u64> {
        self.freqs.get(idx).copied()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.freqs
    }

    // EXACT MATCH ONLY
    pub fn index_of(&self, freq: u64) -> Option<usize> {
        self.freqs.binary_search(&freq).ok()
    }

    // LOWEST ENTRY >= freq. ABOVE THE TABLE RESOLVES TO max().
    pub fn ceil(&self, freq: u64) -> u64 {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.freqs[self.ceil_index(freq)]
    }

    // HIGHEST ENTRY <= freq. BELOW THE TABLE RESOLVES TO min().
    pub fn floor(&self, freq: u64) -> u64 {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        match self.freqs.binary_search(&freq) {
            Ok(i) => self.freqs[i],
            Err(0) => self.min(),
            Err(i) => self.freqs[i - 1],
        }
    }

    fn ceil_index(&self, freq: u64) -> usize {
        match self.freqs.binary_search(&freq) {
            Ok(i) => i,
            Err(i) => i.min(self.freqs.len() - 1),
        }
    }

    // DISTANCE IN TABLE STEPS BETWEEN TWO FREQUENCIES (EACH ROUNDED UP)
    pub fn step_distance(&self, a: u64, b: u64) -> usize {
        self.ceil_index(a).abs_diff(self.ceil_index(b))
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}
