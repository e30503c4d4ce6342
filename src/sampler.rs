// POWERTIDE UTILIZATION SAMPLER
// "top"-STYLE BUSY PERCENTAGES FROM /proc/stat TICK COUNTERS.
//
// TWO GENERATIONS OF COUNTERS ARE KEPT. BUSY IS ALWAYS A DELTA OVER THE
// PREVIOUS GENERATION. A MALFORMED FIELD KEEPS ITS PRIOR VALUE (DELTA 0
// THIS TICK) AND IS PICKED UP AGAIN ON THE NEXT SAMPLE.

use std::path::{Path, PathBuf};

use log::debug;

use crate::basis::BasisPoints;

pub const PROC_STAT: &str = "/proc/stat";

pub const NR_COUNTERS: usize = 10;

// COUNTER ORDER AFTER THE cpu TAG
pub const USER: usize = 0;
pub const NICE: usize = 1;
pub const SYSTEM: usize = 2;
pub const IDLE: usize = 3;
pub const IOWAIT: usize = 4;
pub const IRQ: usize = 5;
pub const SOFTIRQ: usize = 6;
pub const STEAL: usize = 7;
pub const GUEST: usize = 8;
pub const GUEST_NICE: usize = 9;

// --- LINE PARSER ---

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CpuTag {
    Aggregate,
    Cpu(usize),
}

// ONE cpu LINE. None IN A FIELD SLOT = FIELD PRESENT BUT NOT A NUMBER.
// FIELDS PAST THE END OF A SHORT LINE ARE NOT LISTED.
#[derive(Debug, PartialEq, Eq)]
pub struct StatLine {
    pub tag: CpuTag,
    pub fields: Vec<Option<u64>>,
}

// Returns None for lines that are not cpu lines, or whose tag is not
// "cpu" / "cpuN".
pub fn parse_stat_line(line: &str) -> Option<StatLine> {
    let mut tokens = line.split_whitespace();
    let tag = tokens.next()?;
    let rest = tag.strip_prefix("cpu")?;
    let tag = if rest.is_empty() {
        CpuTag::Aggregate
    } else {
        CpuTag::Cpu(rest.parse::<usize>().ok()?)
    };
    let fields = tokens
        .take(NR_COUNTERS)
        .map(|tok| tok.parse::<u64>().ok())
        .collect();
    Some(StatLine { tag, fields })
}

// --- COUNTER GENERATIONS ---

#[derive(Clone, Copy, Default, Debug)]
pub struct CpuTimes {
    pub valid: bool,
    pub counters: [u64; NR_COUNTERS],
}

impl CpuTimes {
    fn apply(&mut self, fields: &[Option<u64>]) -> usize {
        let mut bad = 0;
        self.valid = true;
        for (slot, field) in self.counters.iter_mut().zip(fields) {
            match field {
                Some(v) => *slot = *v,
                None => bad += 1,
            }
        }
        bad
    }
}

#[derive(Clone, Default, Debug)]
struct Generation {
    aggregate: CpuTimes,
    cpus: Vec<CpuTimes>,
}

impl Generation {
    fn slot(&mut self, tag: CpuTag) -> &mut CpuTimes {
        match tag {
            CpuTag::Aggregate => &mut self.aggregate,
            CpuTag::Cpu(cpu) => {
                if cpu >= self.cpus.len() {
                    self.cpus.resize(cpu + 1, CpuTimes::default());
                }
                &mut self.cpus[cpu]
            }
        }
    }

    // NEXT GENERATION STARTS FROM THIS ONE'S VALUES, ALL MARKED ABSENT
    fn carry_forward(&self) -> Self {
        let mut next = self.clone();
        next.aggregate.valid = false;
        for c in &mut next.cpus {
            c.valid = false;
        }
        next
    }
}

// BUSY SHARE OF THE DELTA: EVERYTHING EXCEPT IDLE AND IOWAIT IS BUSY.
// DELTAS SATURATE AT ZERO SO A COUNTER RESET (HOTPLUG) CANNOT UNDERFLOW.
pub fn busy_between(cur: &[u64; NR_COUNTERS], prev: &[u64; NR_COUNTERS]) -> BasisPoints {
    let mut busy = 0u64;
    let mut total = 0u64;
    for idx in 0..NR_COUNTERS {
        let delta = cur[idx].saturating_sub(prev[idx]);
        total += delta;
        if idx != IDLE && idx != IOWAIT {
            busy += delta;
        }
    }
    BasisPoints::ratio(busy, total)
}

// ONE TICK'S MEASUREMENTS. None: UNAVAILABLE THIS TICK.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UtilizationSample {
    pub sys: Option<BasisPoints>,
    pub cpu: Option<BasisPoints>,
    pub gfx: Option<BasisPoints>,
    pub timestamp_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuBusy {
    pub sys: BasisPoints,
    pub cpu: BasisPoints,
}

pub struct UtilizationSampler {
    path: PathBuf,
    prev: Generation,
    cur: Generation,
    primed: bool,
}

impl UtilizationSampler {
    pub fn new(nr_cpus: usize) -> Self {
        Self::with_path(PROC_STAT, nr_cpus)
    }

    pub fn with_path(path: impl AsRef<Path>, nr_cpus: usize) -> Self {
        let gen = Generation {
            aggregate: CpuTimes::default(),
            cpus: vec![CpuTimes::default(); nr_cpus],
        };
        Self {
            path: path.as_ref().to_path_buf(),
            prev: gen.clone(),
            cur: gen,
            primed: false,
        }
    }

    // READ THE COUNTER TABLE ONCE. None WHEN THE SOURCE IS UNREADABLE.
    pub fn sample(&mut self) -> Option<CpuBusy> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Some(self.ingest(&text)),
            Err(e) => {
                debug!("{}: {}", self.path.display(), e);
                None
            }
        }
    }

    // ROTATE GENERATIONS AND FOLD IN ONE FULL TABLE
    pub fn ingest(&mut self, text: &str) -> CpuBusy {
        let next = self.cur.carry_forward();
        self.prev = std::mem::replace(&mut self.cur, next);

        for line in text.lines() {
            let Some(parsed) = parse_stat_line(line) else {
                continue;
            };
            let bad = self.cur.slot(parsed.tag).apply(&parsed.fields);
            if bad > 0 {
                debug!("{:?}: {} malformed field(s), deferring update to next sample", parsed.tag, bad);
            }
        }

        if !self.primed {
            self.primed = true;
            return CpuBusy { sys: BasisPoints::ZERO, cpu: BasisPoints::ZERO };
        }

        let sys = busy_between(&self.cur.aggregate.counters, &self.prev.aggregate.counters);
        let cpu = self.cur.cpus.iter()
            .zip(&self.prev.cpus)
            .filter(|(cur, prev)| cur.valid && prev.valid)
            .map(|(cur, prev)| busy_between(&cur.counters, &prev.counters))
            .max()
            .unwrap_or(BasisPoints::ZERO);

        CpuBusy { sys, cpu }
    }
}
