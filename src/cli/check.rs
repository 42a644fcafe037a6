use std::io::Read;
use std::path::Path;

use anyhow::Result;

use freqctl::sysfs::{self, CPUFREQ_ROOT};

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

    let mut ok = true;
    for opt in ["CONFIG_CPU_FREQ", "CONFIG_CPU_FREQ_GOV_USERSPACE"] {
        if config.lines().any(|l| l == format!("{}=y", opt) || l == format!("{}=m", opt)) {
            println!("  {:<30}OK", opt);
        } else {
            println!("  {:<30}NOT FOUND", opt);
            ok = false;
        }
    }
    ok
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn run_check() -> Result<()> {
    println!("FREQCTL DEPENDENCY CHECK");
    println!();

    let mut ok = true;

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("CPUFREQ POLICIES:");
    let policies = match sysfs::discover_policies(Path::new(CPUFREQ_ROOT)) {
        Ok(p) => p,
        Err(e) => {
            println!("  cpufreq               NOT AVAILABLE ({:#})", e);
            Vec::new()
        }
    };
    if policies.is_empty() {
        ok = false;
    }
    for p in &policies {
        let setspeed = Path::new(CPUFREQ_ROOT)
            .join(format!("policy{}", p.id))
            .join("scaling_setspeed");
        let userspace = p.governor == "userspace";
        println!("  policy{:<3} cpus {:<16} steps {:<3} governor {:<12} setspeed {}",
            p.id,
            format!("{:?}", p.cpus),
            p.freqs.len(),
            if p.governor.is_empty() { "unknown" } else { &p.governor },
            if setspeed.exists() { "OK" } else { "MISSING" });
        if !userspace || !setspeed.exists() {
            ok = false;
        }
    }
    println!();

    if is_root() {
        println!("  privileges            ROOT");
    } else {
        println!("  privileges            NOT ROOT (scaling_setspeed WRITES WILL FAIL)");
        ok = false;
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if policies.iter().any(|p| p.governor != "userspace") {
            println!("  Select the userspace governor:");
            println!("    echo userspace | sudo tee {}/policy*/scaling_governor", CPUFREQ_ROOT);
        }
        println!("  freqctl simulate RUNS WITHOUT ANY OF THE ABOVE");
        std::process::exit(1);
    }

    Ok(())
}
