// POWERTIDE POLICY STATES
// RAW StateSpec (PERCENT UNITS, AS CONFIGURED) IS NORMALIZED ONCE BY
// util_init() INTO ConfigState (BASIS POINTS). LIST ORDER IS MATCH
// PRIORITY. STATES ARE NEVER REMOVED: A BAD ONE IS ONLY MARKED INVALID.

use std::sync::OnceLock;

use log::{info, warn};
use regex::Regex;
use thiserror::Error;

use crate::basis::BasisPoints;
use crate::cpumask::{CpuMask, CpuMaskError};
use crate::platform::IrqPolicy;

pub const DEFAULT_POLL_RATE_MS: u32 = 1000;
pub const MIN_UTIL_INTERVAL_MS: u32 = 100;
pub const MIN_VALID_STATES: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PollIncrement {
    // ADD A FIXED STEP EVERY TICK SPENT IN THE SAME STATE
    Fixed(u32),
    // SCALE max_poll_interval BY IDLE SHARE OF THE BUSIEST CPU
    #[default]
    Adaptive,
    // KEEP THE PREVIOUS INTERVAL
    Passthrough,
}

// --- RAW CONFIGURATION ---

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateSpec {
    pub name: String,
    pub wlt_type: Option<u32>,
    pub entry_system_load_pct: u32,
    pub enter_cpu_load_pct: u32,
    pub exit_cpu_load_pct: u32,
    pub enter_gfx_load_pct: u32,
    // ALREADY IN BASIS POINTS: COMPARED DIRECTLY AGAINST BUSY VALUES
    pub exit_system_load_hyst_bp: u32,
    pub min_poll_interval_ms: u32,
    pub max_poll_interval_ms: u32,
    pub poll_interval_increment: Option<PollIncrement>,
    pub active_cpus: String,
    pub irq_migrate: IrqPolicy,
    pub epp: Option<u32>,
    pub epb: Option<u32>,
    pub itmt: Option<u32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateSpecError {
    #[error("state spec must look like 'name:key=value,...', got '{0}'")]
    Syntax(String),
    #[error("unknown state key '{0}'")]
    UnknownKey(String),
    #[error("bad value '{value}' for '{key}'")]
    BadValue { key: String, value: String },
}

fn spec_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[A-Za-z0-9_.-]+)(?::(?P<body>.*))?$").unwrap()
    })
}

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?P<key>[a-z_]+)\s*=\s*(?P<value>[^=]*?)\s*$").unwrap())
}

fn num(key: &str, value: &str) -> Result<u32, StateSpecError> {
    value.parse::<u32>().map_err(|_| StateSpecError::BadValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl StateSpec {
    // "balanced:cpu=30,sys=20,min_ms=500,max_ms=2000,cpus=0-3;8,epp=128"
    pub fn parse(text: &str) -> Result<Self, StateSpecError> {
        let caps = spec_re()
            .captures(text.trim())
            .ok_or_else(|| StateSpecError::Syntax(text.to_string()))?;
        let mut spec = StateSpec {
            name: caps["name"].to_string(),
            ..Default::default()
        };
        let body = caps.name("body").map(|m| m.as_str()).unwrap_or("");

        for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
            let kv = pair_re()
                .captures(pair)
                .ok_or_else(|| StateSpecError::Syntax(pair.to_string()))?;
            let key = &kv["key"];
            let value = &kv["value"];
            match key {
                "wlt" => spec.wlt_type = Some(num(key, value)?),
                "sys" => spec.entry_system_load_pct = num(key, value)?,
                "cpu" => spec.enter_cpu_load_pct = num(key, value)?,
                "exit_cpu" => spec.exit_cpu_load_pct = num(key, value)?,
                "gfx" => spec.enter_gfx_load_pct = num(key, value)?,
                "hyst_bp" => spec.exit_system_load_hyst_bp = num(key, value)?,
                "min_ms" => spec.min_poll_interval_ms = num(key, value)?,
                "max_ms" => spec.max_poll_interval_ms = num(key, value)?,
                "inc" => {
                    spec.poll_interval_increment = Some(match value {
                        "adaptive" => PollIncrement::Adaptive,
                        "passthrough" => PollIncrement::Passthrough,
                        _ => PollIncrement::Fixed(num(key, value)?),
                    })
                }
                "cpus" => spec.active_cpus = value.replace(';', ","),
                "irq" => {
                    spec.irq_migrate = match value {
                        "on" => IrqPolicy::Enable,
                        "off" => IrqPolicy::Disable,
                        "ignore" => IrqPolicy::Ignore,
                        _ => {
                            return Err(StateSpecError::BadValue {
                                key: key.to_string(),
                                value: value.to_string(),
                            })
                        }
                    }
                }
                "epp" => spec.epp = Some(num(key, value)?),
                "epb" => spec.epb = Some(num(key, value)?),
                "itmt" => spec.itmt = Some(num(key, value)?),
                _ => return Err(StateSpecError::UnknownKey(key.to_string())),
            }
        }
        Ok(spec)
    }
}

// --- NORMALIZED STATE ---

#[derive(Clone, Debug)]
pub struct ConfigState {
    pub id: usize,
    pub name: String,
    pub valid: bool,
    pub wlt_affinity: Option<u32>,
    pub entry_system_load_thres: Option<BasisPoints>,
    pub enter_cpu_load_thres: Option<BasisPoints>,
    pub exit_cpu_load_thres: Option<BasisPoints>,
    pub enter_gfx_load_thres: Option<BasisPoints>,
    pub exit_system_load_hyst: Option<BasisPoints>,
    pub min_poll_interval_ms: u32,
    pub max_poll_interval_ms: u32,
    pub poll_interval_increment: PollIncrement,
    pub active_cpus: Option<CpuMask>,
    pub irq_migrate: IrqPolicy,
    pub epp: Option<u32>,
    pub epb: Option<u32>,
    pub itmt: Option<u32>,
    pub entry_load_sys: Option<BasisPoints>,
    pub entry_load_cpu: Option<BasisPoints>,
}

impl ConfigState {
    pub fn has_load_thresholds(&self) -> bool {
        self.entry_system_load_thres.is_some()
            || self.enter_cpu_load_thres.is_some()
            || self.enter_gfx_load_thres.is_some()
    }
}

fn threshold(pct: u32) -> Option<BasisPoints> {
    (pct > 0).then(|| BasisPoints::from_percent(pct))
}

fn normalize(id: usize, spec: StateSpec) -> Result<ConfigState, CpuMaskError> {
    let active_cpus = if spec.active_cpus.trim().is_empty() {
        None
    } else {
        Some(CpuMask::parse(&spec.active_cpus)?)
    };

    let mut min = spec.min_poll_interval_ms;
    let mut max = spec.max_poll_interval_ms;
    // MIN MAY STAY 0 (UNSET): ENTRY THEN USES THE DEFAULT RATE
    if min == 0 {
        min = if max > DEFAULT_POLL_RATE_MS { DEFAULT_POLL_RATE_MS } else { max };
    }
    if max == 0 {
        max = min.max(DEFAULT_POLL_RATE_MS);
    }

    Ok(ConfigState {
        id,
        name: spec.name,
        valid: true,
        wlt_affinity: spec.wlt_type,
        entry_system_load_thres: threshold(spec.entry_system_load_pct),
        enter_cpu_load_thres: threshold(spec.enter_cpu_load_pct),
        exit_cpu_load_thres: threshold(spec.exit_cpu_load_pct),
        enter_gfx_load_thres: threshold(spec.enter_gfx_load_pct),
        exit_system_load_hyst: (spec.exit_system_load_hyst_bp > 0)
            .then(|| BasisPoints::new(spec.exit_system_load_hyst_bp)),
        min_poll_interval_ms: min,
        max_poll_interval_ms: max,
        poll_interval_increment: spec.poll_interval_increment.unwrap_or_default(),
        active_cpus,
        irq_migrate: spec.irq_migrate,
        epp: spec.epp,
        epb: spec.epb,
        itmt: spec.itmt,
        entry_load_sys: None,
        entry_load_cpu: None,
    })
}

fn invalid(id: usize, spec: StateSpec) -> ConfigState {
    ConfigState {
        id,
        name: spec.name,
        valid: false,
        wlt_affinity: spec.wlt_type,
        entry_system_load_thres: None,
        enter_cpu_load_thres: None,
        exit_cpu_load_thres: None,
        enter_gfx_load_thres: None,
        exit_system_load_hyst: None,
        min_poll_interval_ms: DEFAULT_POLL_RATE_MS,
        max_poll_interval_ms: DEFAULT_POLL_RATE_MS,
        poll_interval_increment: PollIncrement::default(),
        active_cpus: None,
        irq_migrate: spec.irq_migrate,
        epp: spec.epp,
        epb: spec.epb,
        itmt: spec.itmt,
        entry_load_sys: None,
        entry_load_cpu: None,
    }
}

pub struct StateTable {
    pub states: Vec<ConfigState>,
    // FALSE: FEWER THAN TWO VALID STATES, USE THE BUILT-IN CONTROLLER
    pub multi_state: bool,
}

impl StateTable {
    pub fn valid_count(&self) -> usize {
        self.states.iter().filter(|s| s.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// NORMALIZE EVERY CONFIGURED STATE. IDS ARE 1-BASED, IN LIST ORDER.
pub fn util_init(specs: Vec<StateSpec>) -> StateTable {
    let states: Vec<ConfigState> = specs.into_iter()
        .enumerate()
        .map(|(i, spec)| match normalize(i + 1, spec.clone()) {
            Ok(state) => state,
            Err(e) => {
                warn!("STATE {} ({}): INVALID ACTIVE CPUS '{}': {}", i + 1, spec.name, spec.active_cpus, e);
                invalid(i + 1, spec)
            }
        })
        .collect();

    let nr_valid = states.iter().filter(|s| s.valid).count();
    let multi_state = nr_valid >= MIN_VALID_STATES;
    if !multi_state {
        info!("{} valid config states found, using built-in idle/overload control", nr_valid);
    }

    StateTable { states, multi_state }
}
