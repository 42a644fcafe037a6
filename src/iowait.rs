// FREQCTL I/O-WAIT BOOST
// PER-CPU EXPONENTIAL BOOST FOR TASKS WAKING FROM I/O.
// DOUBLES ON BACK-TO-BACK I/O WAKES, HALVES ON PLAIN UPDATES, RESETS ACROSS
// ANY GAP LONGER THAN ONE TICK.

use crate::tuning::{CAPACITY_SCALE, IO_BOOST_MIN};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoBoost {
    value: u64,
    pending: bool,
}

impl IoBoost {
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn reset(&mut self) {
        self.value = 0;
        self.pending = false;
    }

    // ONE UPDATE EVENT. `elapsed_ns` IS THE TIME SINCE THIS CPU'S LAST UPDATE.
    pub fn update(&mut self, elapsed_ns: u64, tick_ns: u64, io_wake: bool) {
        let stale = elapsed_ns > tick_ns;

        if io_wake {
            if stale {
                self.value = IO_BOOST_MIN;
            } else if self.pending {
                return;
            } else if self.value == 0 {
                self.value = IO_BOOST_MIN;
            } else {
                self.value = (self.value * 2).min(CAPACITY_SCALE);
            }
            self.pending = true;
            return;
        }

        if stale {
            self.value = 0;
        } else if !self.pending {
            self.value /= 2;
            if self.value < IO_BOOST_MIN {
                self.value = 0;
            }
        }
        self.pending = false;
    }

    // BOOST SCALED TO THIS CPU'S CAPACITY
    pub fn apply(&self, max_capacity: u64) -> u64 {
        self.value * max_capacity / CAPACITY_SCALE
    }
}
