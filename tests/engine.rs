// POWERTIDE ENGINE TESTS
// FULL TICKS THROUGH periodic_util_update: BUILT-IN IDLE/OVERLOAD CONTROL,
// MULTI-STATE POLICY MATCHING, WORKLOAD-TYPE HINTS, HYSTERESIS.
//
// /proc/stat IS A TEMP FILE REWRITTEN BETWEEN TICKS. TIME IS A ManualClock.
// HARDWARE IS A RECORDING FAKE.

use std::fs;
use std::path::{Path, PathBuf};

use powertide::basis::BasisPoints;
use powertide::clock::ManualClock;
use powertide::cpumask::CpuMask;
use powertide::engine::UtilEngine;
use powertide::event::Mode;
use powertide::gfx::GfxProbe;
use powertide::hysteresis::SysStatus;
use powertide::platform::{Epp, IrqPolicy, ModeChange, MsrReader, PowerControl, UtilConfig};
use powertide::sampler::UtilizationSampler;
use powertide::state::{util_init, StateSpec};

// ---------------------------------------------------------------------------
// FAKE PLATFORM
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakePlatform {
    lpm: bool,
    changes: Vec<ModeChange>,
    epp: Option<u32>,
    masks: Vec<Option<CpuMask>>,
    fail_epp: bool,
}

impl PowerControl for FakePlatform {
    fn in_lpm(&self) -> bool {
        self.lpm
    }
    fn current_epp(&self) -> Epp {
        self.epp.map_or(Epp::Unknown, Epp::Raw)
    }
    fn current_epb(&self) -> Option<u32> {
        None
    }
    fn current_itmt(&self) -> Option<u32> {
        None
    }
    fn set_epp(&mut self, epp: u32) -> anyhow::Result<()> {
        if self.fail_epp {
            anyhow::bail!("EPERM");
        }
        self.epp = Some(epp);
        Ok(())
    }
    fn set_epb(&mut self, _epb: u32) -> anyhow::Result<()> {
        Ok(())
    }
    fn set_itmt(&mut self, _itmt: u32) -> anyhow::Result<()> {
        Ok(())
    }
    fn set_active_cpus(&mut self, mask: Option<&CpuMask>, _irq: IrqPolicy) -> anyhow::Result<()> {
        self.masks.push(mask.cloned());
        Ok(())
    }
    fn process_lpm(&mut self, change: ModeChange) {
        self.lpm = change == ModeChange::Enter;
        self.changes.push(change);
    }
}

impl MsrReader for FakePlatform {
    fn current_cpu(&self) -> usize {
        0
    }
    fn read_msr(&self, _cpu: usize, _addr: u32) -> anyhow::Result<u64> {
        anyhow::bail!("no msr")
    }
}

// ---------------------------------------------------------------------------
// HARNESS
// ---------------------------------------------------------------------------

struct Harness {
    engine: UtilEngine,
    clock: ManualClock,
    stat: PathBuf,
}

impl Harness {
    fn new(name: &str, config: UtilConfig, specs: Vec<StateSpec>) -> Self {
        let stat = std::env::temp_dir()
            .join(format!("powertide-engine-{}-{}.stat", name, std::process::id()));
        write_stat(&stat, 0, 0);
        let clock = ManualClock::starting_at(100_000);
        let engine = UtilEngine::with_parts(
            config,
            util_init(specs),
            UtilizationSampler::with_path(&stat, 1),
            GfxProbe::with_root("/nonexistent/tile0"),
            Box::new(clock.clone()),
        );
        Self { engine, clock, stat }
    }

    // CUMULATIVE COUNTERS FOR THE NEXT TICK
    fn tick(&mut self, busy: u64, idle: u64, ctl: &mut FakePlatform) -> Option<u32> {
        write_stat(&self.stat, busy, idle);
        self.clock.advance(1_000);
        self.engine.periodic_util_update(None, ctl)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        fs::remove_file(&self.stat).ok();
    }
}

fn write_stat(path: &Path, busy: u64, idle: u64) {
    let line = format!("{} 0 0 {} 0 0 0 0 0 0", busy, idle);
    fs::write(path, format!("cpu  {}\ncpu0 {}\n", line, line)).unwrap();
}

fn spec(text: &str) -> StateSpec {
    StateSpec::parse(text).unwrap()
}

// === BUILT-IN CONTROLLER ===

#[test]
fn idle_enters_then_overload_exits() {
    let mut h = Harness::new("two-state", UtilConfig::default(), Vec::new());
    let mut ctl = FakePlatform::default();

    // FIRST TICK: BASELINE, ALWAYS NORMAL
    assert_eq!(h.tick(0, 0, &mut ctl), Some(1000));
    assert_eq!(h.engine.sys_status(), SysStatus::Normal);
    assert!(ctl.changes.is_empty());

    // 1% BUSY <= 10% ENTRY THRESHOLD
    assert_eq!(h.tick(100, 9_900, &mut ctl), Some(1000));
    assert_eq!(h.engine.sys_status(), SysStatus::Idle);
    assert_eq!(ctl.changes, vec![ModeChange::Enter]);
    assert_eq!(h.engine.last_sample().sys, Some(BasisPoints::new(100)));

    // 99% BUSY, BUT FIRST TICK AFTER A SWITCH IS ALWAYS NORMAL
    assert_eq!(h.tick(10_000, 10_000, &mut ctl), Some(1000));
    assert_eq!(h.engine.sys_status(), SysStatus::Normal);
    assert_eq!(ctl.changes.len(), 1);

    // 99% AGAIN: OVERLOAD. INTERVAL SCALES DOWN TO THE 100MS FLOOR.
    assert_eq!(h.tick(19_900, 10_100, &mut ctl), Some(100));
    assert_eq!(h.engine.sys_status(), SysStatus::Overload);
    assert_eq!(ctl.changes, vec![ModeChange::Enter, ModeChange::Exit]);
    assert!(!ctl.lpm);
}

#[test]
fn lpm_interval_follows_cpu_idle_share() {
    let mut h = Harness::new("lpm-interval", UtilConfig::default(), Vec::new());
    let mut ctl = FakePlatform { lpm: true, ..Default::default() };

    h.tick(0, 0, &mut ctl);
    // 35% BUSY -> 1000 * 6500 / 10000 = 650 -> 600
    assert_eq!(h.tick(3_500, 6_500, &mut ctl), Some(600));
    assert!(ctl.changes.is_empty());
}

#[test]
fn configured_intervals_win() {
    let config = UtilConfig { entry_interval_ms: 2_500, exit_interval_ms: 333, ..Default::default() };
    let mut h = Harness::new("fixed-interval", config, Vec::new());
    let mut ctl = FakePlatform::default();

    assert_eq!(h.tick(0, 0, &mut ctl), Some(2_500));
    ctl.lpm = true;
    assert_eq!(h.tick(5_000, 5_000, &mut ctl), Some(333));
}

#[test]
fn hysteresis_blocks_premature_entry() {
    let config = UtilConfig { entry_hyst_ms: 10_000, exit_hyst_ms: 10_000, ..Default::default() };
    let mut h = Harness::new("hyst", config, Vec::new());
    let mut ctl = FakePlatform::default();

    h.tick(0, 0, &mut ctl);
    // IDLE AFTER ONLY 1S OUT OF LPM, MIN DWELL IS 5S
    h.tick(0, 10_000, &mut ctl);
    assert_eq!(h.engine.sys_status(), SysStatus::Idle);
    assert!(ctl.changes.is_empty());
    assert_eq!(h.engine.gate().avg_in, 12_000);

    // 10S LATER THE DWELL IS LONG ENOUGH
    h.clock.advance(10_000);
    h.tick(0, 20_000, &mut ctl);
    assert_eq!(ctl.changes, vec![ModeChange::Enter]);
}

#[test]
fn util_monitor_off_requests_nothing() {
    let config = UtilConfig { util_monitor: false, ..Default::default() };
    let mut h = Harness::new("no-monitor", config, Vec::new());
    let mut ctl = FakePlatform::default();
    assert_eq!(h.tick(0, 0, &mut ctl), None);
    assert_eq!(h.tick(0, 10_000, &mut ctl), None);
    assert!(ctl.changes.is_empty());
}

#[test]
fn single_state_uses_builtin_controller() {
    let mut h = Harness::new("single", UtilConfig::default(), vec![spec("only:cpu=50,epp=64")]);
    let mut ctl = FakePlatform::default();
    h.tick(0, 0, &mut ctl);
    h.tick(0, 10_000, &mut ctl);
    assert!(h.engine.current_state().is_none());
    assert_eq!(ctl.changes, vec![ModeChange::Enter]);
    assert_eq!(ctl.epp, None);
    assert_eq!(h.engine.mode(ctl.lpm), Mode::Lpm);
}

// === MULTI-STATE POLICY ===

#[test]
fn policy_states_follow_load() {
    let specs = vec![
        spec("quiet:sys=20,epp=200,cpus=0-1,min_ms=500,max_ms=4000"),
        spec("busy:epp=32"),
    ];
    let mut h = Harness::new("policy", UtilConfig::default(), specs);
    let mut ctl = FakePlatform::default();

    // BASELINE SAMPLE IS 0% -> quiet
    assert_eq!(h.tick(0, 0, &mut ctl), Some(500));
    assert_eq!(h.engine.current_state().map(|s| s.name.as_str()), Some("quiet"));
    assert_eq!(ctl.epp, Some(200));
    assert_eq!(ctl.masks, vec![Some(CpuMask::parse("0-1").unwrap())]);
    assert_eq!(h.engine.mode(ctl.lpm), Mode::State(1));

    // STAYING: ADAPTIVE INTERVAL, 10% BUSY -> 4000 * 9000 / 10000
    assert_eq!(h.tick(1_000, 9_000, &mut ctl), Some(3_600));
    assert_eq!(ctl.changes.len(), 1);

    // 90% BUSY -> busy, NO MASK
    assert_eq!(h.tick(10_000, 10_000, &mut ctl), Some(1000));
    assert_eq!(h.engine.current_state().map(|s| s.id), Some(2));
    assert_eq!(ctl.epp, Some(32));
    assert_eq!(ctl.masks.last(), Some(&None));
    assert_eq!(ctl.changes.len(), 2);
}

#[test]
fn no_match_returns_none() {
    let specs = vec![spec("a:sys=10"), spec("b:cpu=10")];
    let mut h = Harness::new("no-match", UtilConfig::default(), specs);
    let mut ctl = FakePlatform::default();
    h.tick(0, 0, &mut ctl);
    assert_eq!(h.tick(5_000, 5_000, &mut ctl), None);
}

#[test]
fn setter_failure_does_not_stop_the_tick() {
    let specs = vec![spec("a:epp=10"), spec("b")];
    let mut h = Harness::new("setter-fail", UtilConfig::default(), specs);
    let mut ctl = FakePlatform { fail_epp: true, ..Default::default() };
    assert_eq!(h.tick(0, 0, &mut ctl), Some(1000));
    assert_eq!(h.engine.current_state().map(|s| s.id), Some(1));
    assert_eq!(ctl.changes, vec![ModeChange::Enter]);
}

// === WORKLOAD-TYPE HINTS ===

#[test]
fn hint_selects_bound_state() {
    let specs = vec![spec("idle:wlt=0"), spec("bursty:wlt=2"), spec("fallback")];
    let mut h = Harness::new("hint", UtilConfig::default(), specs);
    let mut ctl = FakePlatform::default();

    // HINT POLLING OFF: STATE CHANGES, NO RE-POLL
    assert_eq!(h.engine.periodic_util_update(Some(2), &mut ctl), None);
    assert_eq!(h.engine.current_state().map(|s| s.name.as_str()), Some("bursty"));

    // UNBOUND HINT FALLS THROUGH TO THE UNCONDITIONAL STATE
    h.engine.periodic_util_update(Some(7), &mut ctl);
    assert_eq!(h.engine.current_state().map(|s| s.name.as_str()), Some("fallback"));
}

#[test]
fn hint_polling_returns_interval() {
    let config = UtilConfig { wlt_hint_poll: true, ..Default::default() };
    let specs = vec![spec("idle:wlt=0,min_ms=200,max_ms=800"), spec("fallback")];
    let mut h = Harness::new("hint-poll", config, specs);
    let mut ctl = FakePlatform::default();
    assert_eq!(h.engine.periodic_util_update(Some(0), &mut ctl), Some(200));
}
