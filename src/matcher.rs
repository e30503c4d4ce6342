// POWERTIDE STATE MATCHER
// PICKS THE ACTIVE POLICY STATE: FIRST STATE IN CONFIGURED ORDER WHOSE
// PREDICATE HOLDS. THE PREDICATE IS PURE (NO SIDE EFFECTS, NO LOGGING
// STATE), SO IT IS TESTABLE WITHOUT ANY HARDWARE COLLABORATOR.
// ALL POSTURE CHANGES HAPPEN IN enter_state().

use log::{debug, info, warn};

use crate::basis::{BasisPoints, Reading};
use crate::platform::{IrqPolicy, ModeChange, PowerControl};
use crate::sampler::UtilizationSample;
use crate::state::{ConfigState, PollIncrement, StateTable, DEFAULT_POLL_RATE_MS, MIN_UTIL_INTERVAL_MS};

// --- PREDICATE ---

fn over(value: Option<BasisPoints>, limit: BasisPoints) -> bool {
    matches!(value, Some(v) if v > limit)
}

pub fn state_match(
    state: &ConfigState,
    is_current: bool,
    sample: &UtilizationSample,
    wlt_index: Option<u32>,
) -> bool {
    if !state.valid {
        return false;
    }

    if let Some(wlt) = state.wlt_affinity {
        if wlt_index != Some(wlt) {
            return false;
        }
    }

    // NOTHING TO COMPARE: MATCHES ON WORKLOAD TYPE (OR UNCONDITIONALLY)
    if !state.has_load_thresholds() {
        return true;
    }

    if let Some(thres) = state.enter_cpu_load_thres {
        if over(sample.cpu, thres) {
            return false;
        }
    }

    if let Some(thres) = state.enter_gfx_load_thres {
        if over(sample.gfx, thres) {
            return false;
        }
    }

    if let Some(thres) = state.entry_system_load_thres {
        if over(sample.sys, thres) {
            // ONLY THE ACTIVE STATE MAY RIDE OUT A MARGINAL READING.
            // THE BAND IS thres + hyst ONLY; THE LOAD AT LAST ENTRY IS NOT A BOUND.
            let Some(hyst) = state.exit_system_load_hyst.filter(|_| is_current) else {
                return false;
            };
            if over(sample.sys, thres.saturating_add(hyst)) {
                return false;
            }
        }
    }

    true
}

fn trace(state: &ConfigState, matched: bool, sample: &UtilizationSample) {
    debug!(
        "{:<6} {:>12}: sys_thres {:?} cpu_thres {:?} gfx_thres {:?} hyst {:?} (bgfx {})",
        if matched { "Match" } else { "Ignore" },
        state.name,
        state.entry_system_load_thres.map(BasisPoints::get),
        state.enter_cpu_load_thres.map(BasisPoints::get),
        state.enter_gfx_load_thres.map(BasisPoints::get),
        state.exit_system_load_hyst.map(BasisPoints::get),
        Reading(sample.gfx),
    );
}

// --- ENGINE STATE ---

pub struct StateMatcher {
    table: StateTable,
    current: Option<usize>,
    interval_ms: u32,
}

impl StateMatcher {
    pub fn new(table: StateTable) -> Self {
        Self {
            table,
            current: None,
            interval_ms: DEFAULT_POLL_RATE_MS,
        }
    }

    pub fn states(&self) -> &[ConfigState] {
        &self.table.states
    }

    pub fn multi_state(&self) -> bool {
        self.table.multi_state && !self.table.is_empty()
    }

    pub fn current_state(&self) -> Option<&ConfigState> {
        self.current.map(|i| &self.table.states[i])
    }

    // INDEX OF THE FIRST MATCHING STATE. NO SIDE EFFECTS.
    pub fn find_match(&self, sample: &UtilizationSample, wlt_index: Option<u32>) -> Option<usize> {
        self.table.states.iter().enumerate().position(|(i, state)| {
            let matched = state_match(state, self.current == Some(i), sample, wlt_index);
            trace(state, matched, sample);
            matched
        })
    }

    // ENTER (OR STAY IN) A STATE. RETURNS THE NEXT POLL INTERVAL IN MS.
    pub fn enter_state(
        &mut self,
        idx: usize,
        sample: &UtilizationSample,
        ctl: &mut dyn PowerControl,
    ) -> u32 {
        let state = &mut self.table.states[idx];
        state.entry_load_sys = sample.sys;
        state.entry_load_cpu = sample.cpu;

        if self.current == Some(idx) {
            self.interval_ms = next_interval(state, self.interval_ms, sample.cpu);
            return self.interval_ms;
        }

        apply_posture(state, ctl);
        ctl.process_lpm(ModeChange::Enter);

        self.interval_ms = if state.min_poll_interval_ms > 0 {
            state.min_poll_interval_ms
        } else {
            DEFAULT_POLL_RATE_MS
        };
        info!("STATE -> [{}] {}", state.id, state.name);
        self.current = Some(idx);
        self.interval_ms
    }

    // SCAN IN ORDER, ENTER THE FIRST MATCH, REPORT. None: NOTHING MATCHED.
    pub fn process_next_config_state(
        &mut self,
        sample: &UtilizationSample,
        wlt_index: Option<u32>,
        ctl: &mut dyn PowerControl,
    ) -> Option<u32> {
        let interval = self.find_match(sample, wlt_index)
            .map(|idx| self.enter_state(idx, sample, ctl));

        if self.current.is_some() {
            info!("{}", self.status_line(sample, interval, ctl));
        }
        interval
    }

    pub fn status_line(
        &self,
        sample: &UtilizationSample,
        interval: Option<u32>,
        ctl: &dyn PowerControl,
    ) -> String {
        let Some(state) = self.current_state() else {
            return String::new();
        };
        let mut line = format!(
            "[{}/{}] {:>12}: bsys {:>6}, bcpu {:>6}, bgfx {:>6}, epp {}, epb {}, ",
            state.id,
            self.table.states.len(),
            state.name,
            Reading(sample.sys),
            Reading(sample.cpu),
            Reading(sample.gfx),
            ctl.current_epp(),
            ctl.current_epb().map_or_else(|| "na".to_string(), |v| format!("{:3}", v)),
        );
        if state.itmt.is_some() {
            let itmt = ctl.current_itmt().map_or_else(|| "na".to_string(), |v| format!("{:2}", v));
            line.push_str(&format!("itmt {}, ", itmt));
        }
        match interval {
            Some(ms) => line.push_str(&format!("interval {:4}", ms)),
            None => line.push_str("interval   na"),
        }
        line
    }
}

// SAME-STATE TICK: ADJUST THE POLL INTERVAL ONLY
pub fn next_interval(state: &ConfigState, interval_ms: u32, cpu: Option<BasisPoints>) -> u32 {
    let mut interval = interval_ms;
    match state.poll_interval_increment {
        PollIncrement::Fixed(step) => interval = interval.saturating_add(step),
        PollIncrement::Adaptive => {
            // BUSIER CPU -> SHORTER INTERVAL, FLOORED TO 100MS STEPS
            if let Some(cpu) = cpu {
                let scaled = state.max_poll_interval_ms as u64 * cpu.idle_share() as u64 / 10_000;
                interval = (scaled as u32 / 100) * 100;
            }
        }
        PollIncrement::Passthrough => {}
    }
    if state.min_poll_interval_ms > 0 && interval < state.min_poll_interval_ms {
        interval = state.min_poll_interval_ms;
    }
    if state.max_poll_interval_ms > 0 && interval > state.max_poll_interval_ms {
        interval = state.max_poll_interval_ms;
    }
    // UNSET MIN: NEVER POLL FASTER THAN THE FLOOR
    interval.max(MIN_UTIL_INTERVAL_MS)
}

fn apply_posture(state: &ConfigState, ctl: &mut dyn PowerControl) {
    if let Some(epp) = state.epp {
        if let Err(e) = ctl.set_epp(epp) {
            warn!("SET EPP {} FAILED: {:#}", epp, e);
        }
    }
    if let Some(epb) = state.epb {
        if let Err(e) = ctl.set_epb(epb) {
            warn!("SET EPB {} FAILED: {:#}", epb, e);
        }
    }
    if let Some(itmt) = state.itmt {
        if let Err(e) = ctl.set_itmt(itmt) {
            warn!("SET ITMT {} FAILED: {:#}", itmt, e);
        }
    }

    // NO MASK: EVERY CPU STAYS ACTIVE AND TASK MIGRATION IS LEFT ALONE
    let (mask, irq) = match &state.active_cpus {
        Some(mask) => (Some(mask), state.irq_migrate),
        None => (None, IrqPolicy::Ignore),
    };
    if let Err(e) = ctl.set_active_cpus(mask, irq) {
        warn!("SET ACTIVE CPUS FAILED: {:#}", e);
    }
}
