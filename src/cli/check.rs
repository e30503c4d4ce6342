use std::io::Read;
use std::path::Path;

use anyhow::Result;

use powertide::gfx::{discover_engines, GT_TILE_ROOT};
use powertide::sampler::{parse_stat_line, CpuTag, PROC_STAT};
use powertide::sysfs::{online_cpus, CPU_ROOT, ITMT_PATH};

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.lines().any(|l| l == "CONFIG_X86_MSR=y" || l == "CONFIG_X86_MSR=m");
    if found {
        println!("  CONFIG_X86_MSR        OK");
    } else {
        println!("  CONFIG_X86_MSR        NOT FOUND -- msr gfx fallback unavailable");
    }
    found
}

// AGGREGATE LINE PRESENT AND AT LEAST ONE PER-CPU LINE
fn check_proc_stat() -> bool {
    let text = match std::fs::read_to_string(PROC_STAT) {
        Ok(t) => t,
        Err(e) => {
            println!("  {:<22}UNREADABLE ({})", PROC_STAT, e);
            return false;
        }
    };
    let lines: Vec<_> = text.lines().filter_map(parse_stat_line).collect();
    let aggregate = lines.iter().any(|l| l.tag == CpuTag::Aggregate);
    let per_cpu = lines.iter().filter(|l| matches!(l.tag, CpuTag::Cpu(_))).count();
    if aggregate && per_cpu > 0 {
        println!("  {:<22}OK ({} cpu lines)", PROC_STAT, per_cpu);
        true
    } else {
        println!("  {:<22}NO CPU COUNTERS", PROC_STAT);
        false
    }
}

fn check_path(label: &str, path: &Path) -> bool {
    let ok = std::fs::File::open(path).is_ok();
    println!("  {:<22}{}", label, if ok { "OK" } else { "NOT AVAILABLE" });
    ok
}

pub fn run_check() -> Result<()> {
    println!("POWERTIDE DATA SOURCE CHECK");
    println!();

    println!("UTILIZATION:");
    let util_ok = check_proc_stat();
    match online_cpus(Path::new(CPU_ROOT)) {
        Ok(mask) => println!("  {:<22}{} ({} cpus)", "online cpus", mask, mask.len()),
        Err(e) => println!("  {:<22}UNKNOWN ({:#})", "online cpus", e),
    }
    println!();

    println!("GRAPHICS:");
    match discover_engines(Path::new(GT_TILE_ROOT)) {
        Some(paths) => {
            println!("  {:<22}{}", "gtidle rc6", if paths.rc6.is_some() { "OK" } else { "MISSING" });
            println!("  {:<22}{}", "gtidle mc6", if paths.mc6.is_some() { "OK" } else { "MISSING" });
        }
        None => println!("  {:<22}NOT AVAILABLE (msr fallback)", "gtidle"),
    }
    let msr_ok = check_path("/dev/cpu/0/msr", Path::new("/dev/cpu/0/msr"));
    if !msr_ok {
        check_kernel_config();
    }
    println!();

    println!("CONTROLS:");
    check_path("epp", &Path::new(CPU_ROOT).join("cpu0/cpufreq/energy_performance_preference"));
    check_path("epb", &Path::new(CPU_ROOT).join("cpu0/power/energy_perf_bias"));
    check_path("itmt", Path::new(ITMT_PATH));
    println!();

    if util_ok {
        println!("UTILIZATION SOURCE AVAILABLE");
    } else {
        println!("UTILIZATION SOURCE MISSING");
        std::process::exit(1);
    }

    Ok(())
}
