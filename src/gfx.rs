// POWERTIDE GRAPHICS UTILIZATION PROBE
// TWO SOURCES, SYSFS PREFERRED:
//   SYSFS: gtidle idle_residency_ms FOR THE RENDER (RC6) AND MEDIA (MC6)
//          ENGINES. BUSY = 10000 - IDLE DELTA / WALL DELTA. BUSIER ENGINE WINS.
//   MSR:   PACKAGE GFX C0 RESIDENCY / TSC ON THE CALLING CPU.
// A FAILED SYSFS PROBE DISABLES SYSFS FOR THE LIFE OF THE PROCESS.
// EVERY TIER'S FIRST READING ONLY RECORDS BASELINES.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::basis::BasisPoints;
use crate::platform::{MsrReader, MSR_PKG_ANY_GFXE_C0_RES, MSR_TSC};

pub const GT_TILE_ROOT: &str = "/sys/class/drm/card0/device/tile0";

const RESIDENCY_FILE: &str = "gtidle/idle_residency_ms";
const NAME_FILE: &str = "gtidle/name";

fn residency_path(root: &Path, gt: &str) -> PathBuf {
    root.join(gt).join(RESIDENCY_FILE)
}

fn readable(path: &Path) -> bool {
    fs::File::open(path).is_ok()
}

fn read_counter(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse::<u64>().ok()
}

// --- SYSFS TIER ---

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnginePaths {
    pub rc6: Option<PathBuf>,
    pub mc6: Option<PathBuf>,
}

// WHICH gt IS RENDER DEPENDS ON THE NAME OF gt0: "gt0-rc" OR "gt0-mc"
pub fn discover_engines(root: &Path) -> Option<EnginePaths> {
    let gt0 = residency_path(root, "gt0");
    if !readable(&gt0) {
        return None;
    }
    let name = fs::read_to_string(root.join("gt0").join(NAME_FILE)).ok()?;
    let gt1 = residency_path(root, "gt1");
    let (rc6, mc6) = if name.starts_with("gt0-rc") {
        (gt0, gt1)
    } else if name.starts_with("gt0-mc") {
        (gt1, gt0)
    } else {
        debug!("unknown gtidle naming '{}'", name.trim());
        return None;
    };
    let paths = EnginePaths {
        rc6: Some(rc6).filter(|p| readable(p)),
        mc6: Some(mc6).filter(|p| readable(p)),
    };
    debug!("gfx rc6: {:?}, sam mc6: {:?}", paths.rc6, paths.mc6);
    Some(paths)
}

#[derive(Default)]
struct EngineCounter {
    path: Option<PathBuf>,
    prev: Option<u64>,
}

impl EngineCounter {
    fn read(&self) -> Option<u64> {
        self.path.as_deref().and_then(read_counter)
    }

    // BUSY OVER elapsed_ms, OR None WITHOUT A BASELINE / READABLE COUNTER
    fn update(&mut self, elapsed_ms: u64, label: &str) -> Option<BasisPoints> {
        let cur = self.read()?;
        let util = self.prev.map(|prev| {
            BasisPoints::complement_of_ratio(cur.saturating_sub(prev), elapsed_ms)
        });
        self.prev = Some(cur);
        if let Some(u) = util {
            debug!("{} utilization: {}", label, u);
        }
        util
    }
}

struct SysfsTier {
    rc6: EngineCounter,
    mc6: EngineCounter,
    prev_ms: u64,
}

impl SysfsTier {
    fn new(paths: EnginePaths, now_ms: u64) -> Self {
        let mut tier = Self {
            rc6: EngineCounter { path: paths.rc6, prev: None },
            mc6: EngineCounter { path: paths.mc6, prev: None },
            prev_ms: now_ms,
        };
        tier.rc6.prev = tier.rc6.read();
        tier.mc6.prev = tier.mc6.read();
        tier
    }

    fn sample(&mut self, now_ms: u64) -> Option<BasisPoints> {
        let elapsed = now_ms.saturating_sub(self.prev_ms);
        if elapsed == 0 {
            return None;
        }
        self.prev_ms = now_ms;
        let gfx = self.rc6.update(elapsed, "GFX");
        let sam = self.mc6.update(elapsed, "SAM");
        gfx.max(sam)
    }
}

enum SysfsState {
    Unprobed,
    Ready(SysfsTier),
    Unavailable,
}

// --- MSR TIER ---

#[derive(Default)]
struct MsrTier {
    prev: Option<(u64, u64)>,
}

impl MsrTier {
    fn sample(&mut self, msr: &dyn MsrReader) -> Option<BasisPoints> {
        let cpu = msr.current_cpu();
        let read = msr.read_msr(cpu, MSR_TSC)
            .and_then(|tsc| Ok((tsc, msr.read_msr(cpu, MSR_PKG_ANY_GFXE_C0_RES)?)));
        let (tsc, res) = match read {
            Ok(v) => v,
            Err(e) => {
                debug!("gfx msr read failed on cpu {}: {}", cpu, e);
                return None;
            }
        };
        let prev = self.prev.replace((tsc, res));
        let (tsc_prev, res_prev) = prev?;
        let dtsc = tsc.wrapping_sub(tsc_prev);
        if dtsc == 0 {
            return None;
        }
        Some(BasisPoints::ratio(res.wrapping_sub(res_prev), dtsc))
    }
}

// --- PROBE ---

pub struct GfxProbe {
    root: PathBuf,
    sysfs: SysfsState,
    msr: MsrTier,
}

impl Default for GfxProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl GfxProbe {
    pub fn new() -> Self {
        Self::with_root(GT_TILE_ROOT)
    }

    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sysfs: SysfsState::Unprobed,
            msr: MsrTier::default(),
        }
    }

    pub fn sysfs_available(&self) -> bool {
        !matches!(self.sysfs, SysfsState::Unavailable)
    }

    pub fn sample(&mut self, now_ms: u64, msr: &dyn MsrReader) -> Option<BasisPoints> {
        match self.sysfs {
            SysfsState::Ready(ref mut tier) => return tier.sample(now_ms),
            SysfsState::Unprobed => match discover_engines(&self.root) {
                Some(paths) => {
                    self.sysfs = SysfsState::Ready(SysfsTier::new(paths, now_ms));
                    return None;
                }
                None => {
                    debug!("gtidle sysfs unavailable under {}, using msr", self.root.display());
                    self.sysfs = SysfsState::Unavailable;
                }
            },
            SysfsState::Unavailable => {}
        }
        self.msr.sample(msr)
    }
}
