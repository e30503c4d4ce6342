// POWERTIDE HOST PLATFORM
// PowerControl + MsrReader BACKED BY SYSFS, PROCFS AND /dev/cpu/N/msr.
//
// EPP:  /sys/devices/system/cpu/cpuN/cpufreq/energy_performance_preference
// EPB:  /sys/devices/system/cpu/cpuN/power/energy_perf_bias
// ITMT: /proc/sys/kernel/sched_itmt_enabled
// THE ACTIVE-CPU MASK AND IRQ POLICY ARE RECORDED AND LOGGED ONLY.
// DRY RUN: EVERY WRITE IS LOGGED AND SKIPPED.

use std::fs;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::cpumask::CpuMask;
use crate::platform::{Epp, IrqPolicy, ModeChange, MsrReader, PowerControl};

pub const CPU_ROOT: &str = "/sys/devices/system/cpu";
pub const ITMT_PATH: &str = "/proc/sys/kernel/sched_itmt_enabled";
pub const MSR_DIR: &str = "/dev/cpu";

const EPP_FILE: &str = "cpufreq/energy_performance_preference";
const EPB_FILE: &str = "power/energy_perf_bias";

// ONLINE CPU LIST, e.g. "0-7" OR "0,2-5"
pub fn online_cpus(cpu_root: &Path) -> Result<CpuMask> {
    let path = cpu_root.join("online");
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    CpuMask::parse(&text).with_context(|| format!("parsing {}", path.display()))
}

fn read_u32(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse::<u32>().ok()
}

pub struct SysfsPlatform {
    cpu_root: PathBuf,
    itmt_path: PathBuf,
    msr_dir: PathBuf,
    online: CpuMask,
    dry_run: bool,
    in_lpm: bool,
    active_cpus: Option<CpuMask>,
    irq: IrqPolicy,
}

impl SysfsPlatform {
    pub fn new(dry_run: bool) -> Result<Self> {
        Self::with_paths(CPU_ROOT, ITMT_PATH, MSR_DIR, dry_run)
    }

    pub fn with_paths(
        cpu_root: impl AsRef<Path>,
        itmt_path: impl AsRef<Path>,
        msr_dir: impl AsRef<Path>,
        dry_run: bool,
    ) -> Result<Self> {
        let cpu_root = cpu_root.as_ref().to_path_buf();
        let online = online_cpus(&cpu_root)?;
        Ok(Self {
            cpu_root,
            itmt_path: itmt_path.as_ref().to_path_buf(),
            msr_dir: msr_dir.as_ref().to_path_buf(),
            online,
            dry_run,
            in_lpm: false,
            active_cpus: None,
            irq: IrqPolicy::Ignore,
        })
    }

    pub fn online(&self) -> &CpuMask {
        &self.online
    }

    pub fn active_cpus(&self) -> Option<&CpuMask> {
        self.active_cpus.as_ref()
    }

    pub fn irq_policy(&self) -> IrqPolicy {
        self.irq
    }

    fn first_cpu(&self) -> usize {
        self.online.iter().next().unwrap_or(0)
    }

    fn cpu_file(&self, cpu: usize, rel: &str) -> PathBuf {
        self.cpu_root.join(format!("cpu{}", cpu)).join(rel)
    }

    fn write(&self, path: &Path, value: &str) -> Result<()> {
        if self.dry_run {
            info!("DRY RUN: {} <- {}", path.display(), value);
            return Ok(());
        }
        fs::write(path, value).with_context(|| format!("writing {} to {}", value, path.display()))
    }

    // SAME VALUE TO EVERY ONLINE CPU. FIRST FAILURE WINS.
    fn write_per_cpu(&self, rel: &str, value: u32) -> Result<()> {
        let value = value.to_string();
        for cpu in self.online.iter() {
            self.write(&self.cpu_file(cpu, rel), &value)?;
        }
        Ok(())
    }
}

impl PowerControl for SysfsPlatform {
    fn in_lpm(&self) -> bool {
        self.in_lpm
    }

    fn current_epp(&self) -> Epp {
        match fs::read_to_string(self.cpu_file(self.first_cpu(), EPP_FILE)) {
            Ok(text) => {
                let text = text.trim();
                match text.parse::<u32>() {
                    Ok(v) => Epp::Raw(v),
                    Err(_) => Epp::Named(text.to_string()),
                }
            }
            Err(_) => Epp::Unknown,
        }
    }

    fn current_epb(&self) -> Option<u32> {
        read_u32(&self.cpu_file(self.first_cpu(), EPB_FILE))
    }

    fn current_itmt(&self) -> Option<u32> {
        read_u32(&self.itmt_path)
    }

    fn set_epp(&mut self, epp: u32) -> Result<()> {
        self.write_per_cpu(EPP_FILE, epp)
    }

    fn set_epb(&mut self, epb: u32) -> Result<()> {
        self.write_per_cpu(EPB_FILE, epb)
    }

    fn set_itmt(&mut self, itmt: u32) -> Result<()> {
        self.write(&self.itmt_path, &itmt.to_string())
    }

    fn set_active_cpus(&mut self, mask: Option<&CpuMask>, irq: IrqPolicy) -> Result<()> {
        if let Some(mask) = mask {
            let stray: Vec<usize> = mask.iter().filter(|c| !self.online.contains(*c)).collect();
            if !stray.is_empty() {
                warn!("ACTIVE CPUS {} INCLUDE OFFLINE CPUS {:?}", mask, stray);
            }
        }
        match mask {
            Some(mask) => info!("ACTIVE CPUS: {} (irq {:?})", mask, irq),
            None => info!("ACTIVE CPUS: ALL (irq {:?})", irq),
        }
        self.active_cpus = mask.cloned();
        self.irq = irq;
        Ok(())
    }

    fn process_lpm(&mut self, change: ModeChange) {
        let enter = change == ModeChange::Enter;
        if enter != self.in_lpm {
            info!("LPM {}", if enter { "ENTER" } else { "EXIT" });
        }
        self.in_lpm = enter;
    }
}

impl MsrReader for SysfsPlatform {
    fn current_cpu(&self) -> usize {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            return self.first_cpu();
        }
        cpu as usize
    }

    fn read_msr(&self, cpu: usize, addr: u32) -> Result<u64> {
        let path = self.msr_dir.join(cpu.to_string()).join("msr");
        let file = fs::File::open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut buf = [0u8; 8];
        file.read_exact_at(&mut buf, addr as u64)
            .with_context(|| format!("reading msr {:#x} on cpu {}", addr, cpu))?;
        Ok(u64::from_le_bytes(buf))
    }
}
