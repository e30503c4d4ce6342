// POWERTIDE ACTIVE-CPU DESCRIPTORS
// "0-3,8,10-11" STYLE LISTS, SAME GRAMMAR AS /sys/devices/system/cpu/online.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CpuMaskError {
    #[error("empty cpu list")]
    Empty,
    #[error("bad cpu token '{0}'")]
    BadToken(String),
    #[error("reversed cpu range {0}-{1}")]
    Reversed(usize, usize),
    #[error("cpu {0} beyond limit {1}")]
    OutOfRange(usize, usize),
}

pub const MAX_CPUS: usize = 8192;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CpuMask {
    cpus: BTreeSet<usize>,
}

impl CpuMask {
    pub fn parse(desc: &str) -> Result<Self, CpuMaskError> {
        let mut cpus = BTreeSet::new();
        for range in desc.trim().split(',') {
            let range = range.trim();
            if range.is_empty() {
                continue;
            }
            let parts: Vec<&str> = range.split('-').collect();
            let (lo, hi) = match parts.len() {
                1 => {
                    let cpu = parse_cpu(parts[0])?;
                    (cpu, cpu)
                }
                2 => (parse_cpu(parts[0])?, parse_cpu(parts[1])?),
                _ => return Err(CpuMaskError::BadToken(range.to_string())),
            };
            if hi < lo {
                return Err(CpuMaskError::Reversed(lo, hi));
            }
            if hi >= MAX_CPUS {
                return Err(CpuMaskError::OutOfRange(hi, MAX_CPUS));
            }
            cpus.extend(lo..=hi);
        }
        if cpus.is_empty() {
            return Err(CpuMaskError::Empty);
        }
        Ok(Self { cpus })
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }
}

fn parse_cpu(tok: &str) -> Result<usize, CpuMaskError> {
    tok.trim()
        .parse::<usize>()
        .map_err(|_| CpuMaskError::BadToken(tok.to_string()))
}

// CANONICAL RANGE FORM: {0,1,2,3,8} -> "0-3,8"
impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = Vec::new();
        let mut iter = self.cpus.iter().copied().peekable();
        while let Some(lo) = iter.next() {
            let mut hi = lo;
            while iter.peek() == Some(&(hi + 1)) {
                hi += 1;
                iter.next();
            }
            if lo == hi {
                out.push(lo.to_string());
            } else {
                out.push(format!("{}-{}", lo, hi));
            }
        }
        f.write_str(&out.join(","))
    }
}
