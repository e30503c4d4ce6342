// POWERTIDE UTILIZATION + STATE MATCHING TESTS
// /proc/stat DELTAS, ORDERED STATE SELECTION, LOAD THRESHOLDS, HYSTERESIS
//
// ALL TESTS USE PURE-RUST TYPES FROM powertide. NO HARDWARE. RUN OFFLINE.

use powertide::basis::BasisPoints;
use powertide::matcher::{state_match, StateMatcher};
use powertide::sampler::{UtilizationSample, UtilizationSampler};
use powertide::state::{util_init, StateSpec};

fn stat(user: u64, system: u64, idle: u64, iowait: u64) -> String {
    format!(
        "cpu  {u} 0 {s} {i} {w} 0 0 0 0 0\ncpu0 {u} 0 {s} {i} {w} 0 0 0 0 0\nintr 0\nctxt 0\n",
        u = user, s = system, i = idle, w = iowait,
    )
}

fn sample(sys: Option<u32>, cpu: Option<u32>, gfx: Option<u32>) -> UtilizationSample {
    UtilizationSample {
        sys: sys.map(BasisPoints::new),
        cpu: cpu.map(BasisPoints::new),
        gfx: gfx.map(BasisPoints::new),
        timestamp_ms: 0,
    }
}

fn spec(text: &str) -> StateSpec {
    StateSpec::parse(text).unwrap()
}

// === /proc/stat SAMPLING ===

#[test]
fn idle_dominated_delta_is_ten_percent() {
    let mut s = UtilizationSampler::with_path("/nonexistent", 1);
    s.ingest(&stat(0, 0, 0, 0));
    // +1000 BUSY, +9000 IDLE OUT OF +10000
    let b = s.ingest(&stat(600, 400, 9000, 0));
    assert_eq!(b.sys.get(), 1000);
    assert_eq!(b.cpu.get(), 1000);
}

#[test]
fn iowait_counts_as_idle() {
    let mut s = UtilizationSampler::with_path("/nonexistent", 1);
    s.ingest(&stat(0, 0, 0, 0));
    let b = s.ingest(&stat(5000, 0, 0, 5000));
    assert_eq!(b.sys.get(), 5000);
}

#[test]
fn no_progress_is_zero_busy() {
    let mut s = UtilizationSampler::with_path("/nonexistent", 1);
    s.ingest(&stat(100, 100, 100, 100));
    let b = s.ingest(&stat(100, 100, 100, 100));
    assert_eq!(b.sys, BasisPoints::ZERO);
    assert_eq!(b.cpu, BasisPoints::ZERO);
}

#[test]
fn busiest_cpu_wins() {
    let mut s = UtilizationSampler::with_path("/nonexistent", 2);
    s.ingest("cpu  0 0 0 0 0 0 0 0 0 0\ncpu0 0 0 0 0 0 0 0 0 0 0\ncpu1 0 0 0 0 0 0 0 0 0 0\n");
    let b = s.ingest(
        "cpu  1000 0 0 1000 0 0 0 0 0 0\ncpu0 100 0 0 900 0 0 0 0 0 0\ncpu1 900 0 0 100 0 0 0 0 0 0\n",
    );
    assert_eq!(b.sys.get(), 5000);
    assert_eq!(b.cpu.get(), 9000);
}

#[test]
fn hotplugged_cpu_ignored_until_seen_twice() {
    let mut s = UtilizationSampler::with_path("/nonexistent", 1);
    s.ingest("cpu  0 0 0 0 0 0 0 0 0 0\ncpu0 0 0 0 0 0 0 0 0 0 0\n");
    s.ingest("cpu  100 0 0 100 0 0 0 0 0 0\ncpu0 0 0 0 100 0 0 0 0 0 0\n");
    // cpu3 APPEARS: NO PREVIOUS GENERATION FOR IT YET
    let b = s.ingest(
        "cpu  200 0 0 200 0 0 0 0 0 0\ncpu0 0 0 0 200 0 0 0 0 0 0\ncpu3 999 0 0 0 0 0 0 0 0 0\n",
    );
    assert_eq!(b.cpu, BasisPoints::ZERO);
}

// === STATE SELECTION ORDER ===

#[test]
fn first_matching_state_wins() {
    let table = util_init(vec![spec("quiet:cpu=30"), spec("fallback")]);
    let m = StateMatcher::new(table);
    assert_eq!(m.find_match(&sample(Some(0), Some(2500), None), None), Some(0));
    assert_eq!(m.find_match(&sample(Some(0), Some(3500), None), None), Some(1));
}

#[test]
fn order_changes_selection() {
    let table = util_init(vec![spec("fallback"), spec("quiet:cpu=30")]);
    let m = StateMatcher::new(table);
    // UNCONDITIONAL STATE FIRST SHADOWS EVERYTHING BEHIND IT
    assert_eq!(m.find_match(&sample(Some(0), Some(2500), None), None), Some(0));
}

#[test]
fn nothing_matches() {
    let table = util_init(vec![spec("a:cpu=10"), spec("b:sys=10")]);
    let m = StateMatcher::new(table);
    assert_eq!(m.find_match(&sample(Some(5000), Some(5000), None), None), None);
}

#[test]
fn invalid_state_skipped_in_order() {
    let table = util_init(vec![spec("broken:cpus=9-1"), spec("a"), spec("b")]);
    assert!(!table.states[0].valid);
    let m = StateMatcher::new(table);
    assert_eq!(m.find_match(&sample(None, None, None), None), Some(1));
}

// === LOAD THRESHOLDS ===

#[test]
fn cpu_threshold_boundary() {
    let table = util_init(vec![spec("s:cpu=30")]);
    let s = &table.states[0];
    assert!(state_match(s, false, &sample(None, Some(2500), None), None));
    assert!(state_match(s, false, &sample(None, Some(3000), None), None));
    assert!(!state_match(s, false, &sample(None, Some(3500), None), None));
}

#[test]
fn unavailable_readings_never_disqualify() {
    let table = util_init(vec![spec("s:cpu=30,sys=10,gfx=5")]);
    assert!(state_match(&table.states[0], false, &sample(None, None, None), None));
}

#[test]
fn hysteresis_holds_current_state() {
    let table = util_init(vec![spec("s:sys=50,hyst_bp=1000"), spec("other")]);
    let mut m = StateMatcher::new(table);
    let mut ctl = NullControl::default();

    // ENTERED AT 40%
    let entry = sample(Some(4000), Some(0), None);
    assert!(m.process_next_config_state(&entry, None, &mut ctl).is_some());
    assert_eq!(m.current_state().map(|s| s.id), Some(1));
    assert_eq!(m.current_state().and_then(|s| s.entry_load_sys), Some(BasisPoints::new(4000)));

    // 58%: WITHIN THE BAND, STAYS
    m.process_next_config_state(&sample(Some(5800), Some(0), None), None, &mut ctl);
    assert_eq!(m.current_state().map(|s| s.id), Some(1));

    // 62%: OUTSIDE THE BAND, FALLS THROUGH
    m.process_next_config_state(&sample(Some(6200), Some(0), None), None, &mut ctl);
    assert_eq!(m.current_state().map(|s| s.id), Some(2));

    // BACK AT 58% FROM ANOTHER STATE: NO BAND, NO MATCH
    m.process_next_config_state(&sample(Some(5800), Some(0), None), None, &mut ctl);
    assert_eq!(m.current_state().map(|s| s.id), Some(2));
}

// === TABLE SETUP ===

#[test]
fn single_valid_state_disables_multi_state() {
    let table = util_init(vec![spec("only:cpu=10")]);
    assert!(!table.multi_state);
    assert!(!StateMatcher::new(table).multi_state());
}

#[test]
fn two_valid_states_enable_multi_state() {
    let table = util_init(vec![spec("a:cpu=10"), spec("b")]);
    assert!(table.multi_state);
    assert!(StateMatcher::new(table).multi_state());
}

#[test]
fn empty_table_disables_multi_state() {
    let table = util_init(Vec::new());
    assert!(table.is_empty());
    assert!(!StateMatcher::new(table).multi_state());
}

// === FAKE COLLABORATOR ===

#[derive(Default)]
struct NullControl {
    lpm: bool,
}

impl powertide::platform::PowerControl for NullControl {
    fn in_lpm(&self) -> bool {
        self.lpm
    }
    fn current_epp(&self) -> powertide::platform::Epp {
        powertide::platform::Epp::Unknown
    }
    fn current_epb(&self) -> Option<u32> {
        None
    }
    fn current_itmt(&self) -> Option<u32> {
        None
    }
    fn set_epp(&mut self, _epp: u32) -> anyhow::Result<()> {
        Ok(())
    }
    fn set_epb(&mut self, _epb: u32) -> anyhow::Result<()> {
        Ok(())
    }
    fn set_itmt(&mut self, _itmt: u32) -> anyhow::Result<()> {
        Ok(())
    }
    fn set_active_cpus(
        &mut self,
        _mask: Option<&powertide::cpumask::CpuMask>,
        _irq: powertide::platform::IrqPolicy,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    fn process_lpm(&mut self, change: powertide::platform::ModeChange) {
        self.lpm = change == powertide::platform::ModeChange::Enter;
    }
}
