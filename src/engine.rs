// POWERTIDE UTILIZATION ENGINE
// ONE CALL PER TICK. TWO MODES:
//   HINT-DRIVEN:      A WORKLOAD-TYPE INDEX IS SUPPLIED. MATCH POLICY STATES
//                     AGAINST IT (REFRESHING GFX FIRST IF HINT POLLING IS ON).
//   THRESHOLD-DRIVEN: NO INDEX. SAMPLE CPU/SYS/GFX, THEN EITHER MATCH POLICY
//                     STATES OR RUN THE BUILT-IN IDLE/OVERLOAD CONTROLLER.
// THE RETURNED INTERVAL IS ADVISORY. None: NO RE-POLL REQUESTED.

use log::info;

use crate::basis::Reading;
use crate::clock::{Clock, MonotonicClock};
use crate::event::Mode;
use crate::gfx::GfxProbe;
use crate::hysteresis::{HysteresisGate, SysStatus};
use crate::matcher::StateMatcher;
use crate::platform::{ModeChange, MsrReader, PowerControl, UtilConfig};
use crate::sampler::{UtilizationSample, UtilizationSampler};
use crate::state::{ConfigState, StateTable, DEFAULT_POLL_RATE_MS, MIN_UTIL_INTERVAL_MS};

pub struct UtilEngine {
    config: UtilConfig,
    clock: Box<dyn Clock>,
    sampler: UtilizationSampler,
    gfx: GfxProbe,
    gate: HysteresisGate,
    matcher: StateMatcher,
    sample: UtilizationSample,
    initialized: bool,
    first_run: bool,
    sys_status: SysStatus,
}

impl UtilEngine {
    pub fn new(config: UtilConfig, table: StateTable, nr_cpus: usize) -> Self {
        Self::with_parts(
            config,
            table,
            UtilizationSampler::new(nr_cpus),
            GfxProbe::new(),
            Box::new(MonotonicClock),
        )
    }

    pub fn with_parts(
        config: UtilConfig,
        table: StateTable,
        sampler: UtilizationSampler,
        gfx: GfxProbe,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            config,
            clock,
            sampler,
            gfx,
            gate: HysteresisGate::default(),
            matcher: StateMatcher::new(table),
            sample: UtilizationSample::default(),
            initialized: false,
            first_run: true,
            sys_status: SysStatus::Unknown,
        }
    }

    pub fn last_sample(&self) -> &UtilizationSample {
        &self.sample
    }

    pub fn current_state(&self) -> Option<&ConfigState> {
        self.matcher.current_state()
    }

    pub fn sys_status(&self) -> SysStatus {
        self.sys_status
    }

    pub fn gate(&self) -> &HysteresisGate {
        &self.gate
    }

    pub fn matcher(&self) -> &StateMatcher {
        &self.matcher
    }

    // TICK HISTORY LABEL: POLICY STATE, OR THE BUILT-IN CONTROLLER'S MODE
    pub fn mode(&self, in_lpm: bool) -> Mode {
        match self.current_state() {
            Some(state) => Mode::State(state.id),
            None if in_lpm => Mode::Lpm,
            None => Mode::Normal,
        }
    }

    pub fn periodic_util_update<P>(&mut self, wlt_index: Option<u32>, platform: &mut P) -> Option<u32>
    where
        P: PowerControl + MsrReader,
    {
        let now = self.clock.now_ms();
        self.sample.timestamp_ms = now;

        if wlt_index.is_some() {
            if self.config.wlt_hint_poll {
                self.sample.gfx = self.gfx.sample(now, &*platform);
                return self.matcher.process_next_config_state(&self.sample, wlt_index, &mut *platform);
            }
            self.matcher.process_next_config_state(&self.sample, wlt_index, &mut *platform);
            return None;
        }

        // NO MONITOR: THE HOST SHOULD WAIT INDEFINITELY
        if !self.config.util_monitor {
            return None;
        }

        if !self.initialized {
            self.gate = HysteresisGate::new(now, self.config.entry_hyst_ms, self.config.exit_hyst_ms);
            self.initialized = true;
        }

        match self.sampler.sample() {
            Some(busy) => {
                self.sample.sys = Some(busy.sys);
                self.sample.cpu = Some(busy.cpu);
            }
            None => {
                self.sample.sys = None;
                self.sample.cpu = None;
            }
        }
        self.sample.gfx = self.gfx.sample(now, &*platform);

        if self.matcher.multi_state() {
            return self.matcher.process_next_config_state(&self.sample, None, &mut *platform);
        }

        Some(self.two_state_tick(now, &mut *platform))
    }

    // --- BUILT-IN IDLE/OVERLOAD CONTROLLER ---

    fn classify(&self, in_lpm: bool) -> SysStatus {
        if self.first_run {
            return SysStatus::Normal;
        }
        match (in_lpm, self.sample.sys, self.sample.cpu) {
            (false, Some(sys), _) if sys <= self.config.entry_threshold => SysStatus::Idle,
            (true, _, Some(cpu)) if cpu > self.config.exit_threshold => SysStatus::Overload,
            _ => SysStatus::Normal,
        }
    }

    fn util_interval(&self, in_lpm: bool) -> u32 {
        let interval = if in_lpm {
            if self.config.exit_interval_ms > 0 {
                return self.config.exit_interval_ms;
            }
            match self.sample.cpu {
                Some(cpu) if !self.first_run => {
                    (DEFAULT_POLL_RATE_MS as u64 * cpu.idle_share() as u64 / 10_000) as u32
                }
                _ => return DEFAULT_POLL_RATE_MS,
            }
        } else {
            if self.config.entry_interval_ms > 0 {
                return self.config.entry_interval_ms;
            }
            DEFAULT_POLL_RATE_MS
        };

        ((interval / 100) * 100).max(MIN_UTIL_INTERVAL_MS)
    }

    fn two_state_tick(&mut self, now: u64, ctl: &mut dyn PowerControl) -> u32 {
        let in_lpm = ctl.in_lpm();
        self.sys_status = self.classify(in_lpm);
        let mut interval = self.util_interval(in_lpm);

        info!(
            "{:<8} SYS util {:>6} (entry threshold {:>6}), CPU util {:>6} (exit threshold {:>6}), resample after {:4} ms",
            self.sys_status.label(),
            Reading(self.sample.sys),
            self.config.entry_threshold,
            Reading(self.sample.cpu),
            self.config.exit_threshold,
            interval,
        );

        self.first_run = false;

        if !self.gate.should_proceed(self.sys_status, now) {
            return interval;
        }

        match self.sys_status {
            SysStatus::Idle => {
                ctl.process_lpm(ModeChange::Enter);
                self.first_run = true;
                self.gate.mark_entered(now);
                interval = DEFAULT_POLL_RATE_MS;
            }
            SysStatus::Overload => {
                ctl.process_lpm(ModeChange::Exit);
                self.first_run = true;
                self.gate.mark_exited(now);
            }
            SysStatus::Normal | SysStatus::Unknown => {}
        }

        interval
    }
}
