// POWERTIDE FIXED-POINT PERCENTAGES
// EVERY BUSY VALUE AND LOAD THRESHOLD IN THE CRATE IS A BasisPoints.
// 10000 == 100.00%. PERCENT -> BASIS POINT SCALING HAPPENS ONLY IN
// from_percent(), CALLED ONCE PER VALUE WHEN CONFIGURATION IS NORMALIZED.

use std::fmt;

pub const FULL_SCALE: u32 = 10_000;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct BasisPoints(u32);

impl BasisPoints {
    pub const ZERO: Self = Self(0);
    pub const FULL: Self = Self(FULL_SCALE);

    // CLAMPS INTO [0, 10000]
    pub fn new(bp: u32) -> Self {
        Self(bp.min(FULL_SCALE))
    }

    pub fn from_percent(pct: u32) -> Self {
        Self::new(pct.saturating_mul(100))
    }

    // num / den AS BASIS POINTS. ZERO DENOMINATOR READS AS 0.
    pub fn ratio(num: u64, den: u64) -> Self {
        if den == 0 {
            return Self::ZERO;
        }
        let bp = (num as u128 * FULL_SCALE as u128) / den as u128;
        Self::new(bp.min(FULL_SCALE as u128) as u32)
    }

    // 10000 - num / den. USED FOR IDLE-RESIDENCY COUNTERS.
    pub fn complement_of_ratio(num: u64, den: u64) -> Self {
        Self(FULL_SCALE - Self::ratio(num, den).0)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self::new(self.0 + other.0)
    }

    pub fn idle_share(self) -> u32 {
        FULL_SCALE - self.0
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = format!("{}.{:02}", self.0 / 100, self.0 % 100);
        f.pad(&whole)
    }
}

// "n/a" FOR AN UNAVAILABLE READING, OTHERWISE THE TWO-DECIMAL PERCENTAGE
pub struct Reading(pub Option<BasisPoints>);

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(bp) => fmt::Display::fmt(&bp, f),
            None => f.pad("n/a"),
        }
    }
}
