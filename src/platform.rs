// POWERTIDE COLLABORATOR INTERFACES
// THE DECISION CORE NEVER TOUCHES HARDWARE DIRECTLY. EVERYTHING IT READS
// FROM OR WRITES TO THE MACHINE GOES THROUGH THESE TRAITS.

use std::fmt;

use anyhow::Result;

use crate::basis::BasisPoints;
use crate::cpumask::CpuMask;

pub const MSR_TSC: u32 = 0x10;
pub const MSR_PKG_ANY_GFXE_C0_RES: u32 = 0x65A;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModeChange {
    Enter,
    Exit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum IrqPolicy {
    Enable,
    Disable,
    #[default]
    Ignore,
}

// CURRENT ENERGY-PERFORMANCE PREFERENCE: NUMERIC OR A NAMED PROFILE
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Epp {
    Raw(u32),
    Named(String),
    Unknown,
}

impl fmt::Display for Epp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Epp::Raw(v) => write!(f, "{:3}", v),
            Epp::Named(s) => f.write_str(s),
            Epp::Unknown => f.write_str("na"),
        }
    }
}

pub trait PowerControl {
    fn in_lpm(&self) -> bool;

    fn current_epp(&self) -> Epp;
    fn current_epb(&self) -> Option<u32>;
    fn current_itmt(&self) -> Option<u32>;

    fn set_epp(&mut self, epp: u32) -> Result<()>;
    fn set_epb(&mut self, epb: u32) -> Result<()>;
    fn set_itmt(&mut self, itmt: u32) -> Result<()>;

    // None: ALL CPUS ACTIVE, TASK MIGRATION LEFT ALONE
    fn set_active_cpus(&mut self, mask: Option<&CpuMask>, irq: IrqPolicy) -> Result<()>;

    fn process_lpm(&mut self, change: ModeChange);
}

pub trait MsrReader {
    fn current_cpu(&self) -> usize;
    fn read_msr(&self, cpu: usize, addr: u32) -> Result<u64>;
}

// SIGNALS THE SPIKE TRACKER NEEDS FROM THE WORKLOAD CLASSIFIER
pub trait BurstContext {
    // CLASSIFIER WANTS TO STEP DOWN TO A LOWER-PERFORMANCE STATE
    fn should_demote(&self) -> bool;
    // OPERATING MODE IS AT OR BELOW THE PERFORMANCE-SENSITIVE LEVEL,
    // SO A REAL BURST COUNTS TOWARD THE BURST RATE
    fn mode_counts_bursts(&self) -> bool;
}

// SNAPSHOT OF THE CLASSIFIER SIGNALS, FOR CALLERS THAT SAMPLE THEM PER CALL
#[derive(Clone, Copy, Debug, Default)]
pub struct BurstSignals {
    pub should_demote: bool,
    pub mode_counts_bursts: bool,
}

impl BurstContext for BurstSignals {
    fn should_demote(&self) -> bool {
        self.should_demote
    }

    fn mode_counts_bursts(&self) -> bool {
        self.mode_counts_bursts
    }
}

// GLOBAL UTILIZATION SETTINGS FOR THE BUILT-IN TWO-STATE CONTROLLER
#[derive(Clone, Debug)]
pub struct UtilConfig {
    pub util_monitor: bool,
    pub wlt_hint_poll: bool,
    pub entry_threshold: BasisPoints,
    pub exit_threshold: BasisPoints,
    // 0: DERIVE FROM LOAD
    pub entry_interval_ms: u32,
    pub exit_interval_ms: u32,
    pub entry_hyst_ms: u64,
    pub exit_hyst_ms: u64,
}

impl Default for UtilConfig {
    fn default() -> Self {
        Self {
            util_monitor: true,
            wlt_hint_poll: false,
            entry_threshold: BasisPoints::from_percent(10),
            exit_threshold: BasisPoints::from_percent(95),
            entry_interval_ms: 0,
            exit_interval_ms: 0,
            entry_hyst_ms: 0,
            exit_hyst_ms: 0,
        }
    }
}
