// POWERTIDE CLOCKS
// ALL DWELL TIMES, RESIDENCY DELTAS AND BURST WINDOWS ARE MEASURED ON
// CLOCK_MONOTONIC. TESTS DRIVE A ManualClock INSTEAD.

use std::cell::Cell;
use std::rc::Rc;

pub trait Clock {
    fn now_ms(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

#[derive(Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        now_ns() / 1_000_000
    }
}

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

// SHARED HANDLE: CLONES OBSERVE THE SAME TIME, SO A TEST CAN KEEP ONE
// COPY AND HAND THE OTHER TO THE COMPONENT UNDER TEST.
#[derive(Clone, Default)]
pub struct ManualClock {
    ms: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn starting_at(ms: u64) -> Self {
        Self { ms: Rc::new(Cell::new(ms)) }
    }

    pub fn advance(&self, ms: u64) {
        self.ms.set(self.ms.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.ms.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.get()
    }
}
