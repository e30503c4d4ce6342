// POWERTIDE TICK HISTORY
// RECORDS ONE SNAPSHOT PER ENGINE TICK
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION DURING MONITORING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use std::collections::BTreeMap;
use std::fmt;

use crate::basis::{BasisPoints, Reading};
use crate::clock::now_ns;

const MAX_SNAPSHOTS: usize = 8192;

// WHAT THE DAEMON WAS DOING AFTER THE TICK
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum Mode {
    #[default]
    Normal,
    Lpm,
    State(usize),
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => f.pad("NORMAL"),
            Mode::Lpm => f.pad("LPM"),
            Mode::State(id) => f.pad(&format!("STATE {}", id)),
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct Snapshot {
    pub ts_ns:       u64,
    pub sys:         Option<BasisPoints>,
    pub cpu:         Option<BasisPoints>,
    pub gfx:         Option<BasisPoints>,
    pub interval_ms: Option<u32>,
    pub mode:        Mode,
}

#[derive(Debug, PartialEq)]
pub struct Summary {
    pub ticks:       usize,
    pub elapsed_s:   f64,
    pub avg_sys:     Option<BasisPoints>,
    pub avg_cpu:     Option<BasisPoints>,
    pub avg_gfx:     Option<BasisPoints>,
    pub peak_cpu:    Option<BasisPoints>,
    pub transitions: usize,
    pub mode_ticks:  BTreeMap<Mode, usize>,
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

fn average(values: impl Iterator<Item = Option<BasisPoints>>) -> Option<BasisPoints> {
    let (sum, n) = values
        .flatten()
        .fold((0u64, 0u64), |(sum, n), v| (sum + v.get() as u64, n + 1));
    if n == 0 {
        return None;
    }
    Some(BasisPoints::new((sum / n) as u32))
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Snapshot::default(); MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // RECORD ONE TICK. OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn snapshot(&mut self, sys: Option<BasisPoints>, cpu: Option<BasisPoints>,
                    gfx: Option<BasisPoints>, interval_ms: Option<u32>, mode: Mode) {
        self.snapshots[self.head] = Snapshot {
            ts_ns: now_ns(),
            sys,
            cpu,
            gfx,
            interval_ms,
            mode,
        };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<8} {:<8} {:<8} {:<10} {:<12}",
            "TIME_S", "SYS", "CPU", "GFX", "NEXT_MS", "MODE");
        println!("{}", "-".repeat(60));

        for s in std::iter::once(first).chain(iter) {
            let elapsed_s = s.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            let next = s.interval_ms.map_or_else(|| "-".to_string(), |ms| ms.to_string());
            println!("{:<10.1} {:<8} {:<8} {:<8} {:<10} {:<12}",
                elapsed_s, Reading(s.sys), Reading(s.cpu), Reading(s.gfx), next, s.mode);
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // None WITH FEWER THAN TWO TICKS
    pub fn stats(&self) -> Option<Summary> {
        if self.len < 2 {
            return None;
        }

        let snapshots: Vec<&Snapshot> = self.iter_chronological().collect();
        let first = snapshots.first()?;
        let last = snapshots.last()?;

        let mut mode_ticks = BTreeMap::new();
        for s in &snapshots {
            *mode_ticks.entry(s.mode).or_insert(0) += 1;
        }

        Some(Summary {
            ticks: snapshots.len(),
            elapsed_s: last.ts_ns.saturating_sub(first.ts_ns) as f64 / 1_000_000_000.0,
            avg_sys: average(snapshots.iter().map(|s| s.sys)),
            avg_cpu: average(snapshots.iter().map(|s| s.cpu)),
            avg_gfx: average(snapshots.iter().map(|s| s.gfx)),
            peak_cpu: snapshots.iter().filter_map(|s| s.cpu).max(),
            transitions: snapshots.windows(2).filter(|w| w[0].mode != w[1].mode).count(),
            mode_ticks,
        })
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        let Some(stats) = self.stats() else {
            return;
        };

        println!("\n{}", "=".repeat(50));
        println!("POWERTIDE SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  AVG SYS BUSY:      {}%", Reading(stats.avg_sys));
        println!("  AVG CPU BUSY:      {}%", Reading(stats.avg_cpu));
        println!("  AVG GFX BUSY:      {}%", Reading(stats.avg_gfx));
        println!("  PEAK CPU BUSY:     {}%", Reading(stats.peak_cpu));
        println!("  TRANSITIONS:       {}", stats.transitions);
        for (mode, ticks) in &stats.mode_ticks {
            let share = *ticks as f64 / stats.ticks as f64 * 100.0;
            println!("  {:<18} {:.1}%", format!("{}:", mode), share);
        }
        println!("  ELAPSED:           {:.1}s", stats.elapsed_s);
        println!("  SAMPLES:           {}", stats.ticks);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bp(v: u32) -> Option<BasisPoints> {
        Some(BasisPoints::new(v))
    }

    #[test]
    fn snapshot_records() {
        let mut log = EventLog::new();
        assert_eq!(log.len, 0);

        log.snapshot(bp(1000), bp(2000), None, Some(700), Mode::Lpm);
        assert_eq!(log.len, 1);
        assert_eq!(log.snapshots[0].sys, bp(1000));
        assert_eq!(log.snapshots[0].cpu, bp(2000));
        assert_eq!(log.snapshots[0].gfx, None);
        assert_eq!(log.snapshots[0].interval_ms, Some(700));
        assert_eq!(log.snapshots[0].mode, Mode::Lpm);
        assert!(log.snapshots[0].ts_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = EventLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_SNAPSHOTS {
            log.snapshot(None, None, None, Some(i as u32), Mode::Normal);
        }
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 0); // WRAPPED BACK TO START

        // WRITE ONE MORE -- OVERWRITES OLDEST
        log.snapshot(None, None, None, Some(9999), Mode::Normal);
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 1);
        assert_eq!(log.snapshots[0].interval_ms, Some(9999));

        // CHRONOLOGICAL ITERATION STARTS FROM OLDEST (INDEX 1)
        let ordered: Vec<Option<u32>> = log.iter_chronological()
            .map(|s| s.interval_ms)
            .collect();
        assert_eq!(ordered[0], Some(1)); // OLDEST SURVIVING ENTRY
        assert_eq!(ordered.last(), Some(&Some(9999))); // NEWEST
        assert_eq!(ordered.len(), MAX_SNAPSHOTS);
    }

    #[test]
    fn stats_skip_unavailable_readings() {
        let mut log = EventLog::new();
        log.snapshot(bp(1000), bp(4000), None, Some(1000), Mode::Normal);
        log.snapshot(None, None, None, Some(1000), Mode::Normal);
        log.snapshot(bp(3000), bp(8000), None, Some(1000), Mode::Lpm);

        let stats = log.stats().unwrap();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.avg_sys, bp(2000));
        assert_eq!(stats.avg_cpu, bp(6000));
        assert_eq!(stats.avg_gfx, None);
        assert_eq!(stats.peak_cpu, bp(8000));
    }

    #[test]
    fn stats_count_transitions_and_share() {
        let mut log = EventLog::new();
        for mode in [Mode::State(1), Mode::State(1), Mode::State(2), Mode::State(1)] {
            log.snapshot(None, None, None, None, mode);
        }
        let stats = log.stats().unwrap();
        assert_eq!(stats.transitions, 2);
        assert_eq!(stats.mode_ticks[&Mode::State(1)], 3);
        assert_eq!(stats.mode_ticks[&Mode::State(2)], 1);
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = EventLog::new();
        assert!(log.stats().is_none());
        log.summary(); // SHOULD NOT PANIC WITH 0 SNAPSHOTS
    }

    #[test]
    fn summary_no_panic_one() {
        let mut log = EventLog::new();
        log.snapshot(bp(100), bp(200), bp(300), None, Mode::Normal);
        log.summary(); // SHOULD NOT PANIC WITH 1 SNAPSHOT
    }

    #[test]
    fn dump_no_panic() {
        let mut log = EventLog::new();
        log.snapshot(bp(100), bp(200), None, Some(1000), Mode::Normal);
        log.snapshot(bp(9000), bp(9900), bp(50), Some(100), Mode::State(3));
        log.dump(); // SHOULD NOT PANIC
    }
}
