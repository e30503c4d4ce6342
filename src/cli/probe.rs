use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;

use powertide::basis::Reading;
use powertide::clock::{Clock, MonotonicClock};
use powertide::gfx::GfxProbe;
use powertide::sampler::UtilizationSampler;
use powertide::sysfs::SysfsPlatform;

static RUNNING: AtomicBool = AtomicBool::new(true);

const PROBE_PERIOD_MS: u64 = 1000;
const SLEEP_SLICE_MS: u64 = 100;

// ONE LINE PER SECOND: SYS, BUSIEST CPU, GFX. NOTHING IS WRITTEN.
pub fn run_probe() -> Result<()> {
    ctrlc::set_handler(move || {
        RUNNING.store(false, Ordering::Relaxed);
    })
    .ok();

    let platform = SysfsPlatform::new(true)?;
    let nr_cpus = platform.online().iter().last().map_or(1, |c| c + 1);
    let mut sampler = UtilizationSampler::new(nr_cpus);
    let mut gfx = GfxProbe::new();
    let clock = MonotonicClock;

    println!("{:>8} {:>8} {:>8}", "SYS", "CPU", "GFX");
    while RUNNING.load(Ordering::Relaxed) {
        let busy = sampler.sample();
        let gfx_bp = gfx.sample(clock.now_ms(), &platform);
        println!("{:>8} {:>8} {:>8}",
            Reading(busy.map(|b| b.sys)), Reading(busy.map(|b| b.cpu)), Reading(gfx_bp));

        let mut left = PROBE_PERIOD_MS;
        while left > 0 && RUNNING.load(Ordering::Relaxed) {
            let step = left.min(SLEEP_SLICE_MS);
            std::thread::sleep(Duration::from_millis(step));
            left -= step;
        }
    }
    Ok(())
}
