/// System module: Android property probing, battery chore

use std::fs;
use std::path::PathBuf;
use std::process::Command;

/// Run a command and return its trimmed stdout, or None on any failure.
/// Stdout is captured; nothing is inherited from the daemon's streams.
fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output() {
        Ok(out) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Ok(_) => None,
        Err(e) => {
            log::debug!("[System] Failed to execute {}: {}", program, e);
            None
        }
    }
}

/// Read one Android system property via getprop.
pub fn get_prop(name: &str) -> Option<String> {
    command_stdout("getprop", &[name])
}

/// Static facts about the device, probed once at startup.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub android_version: String,
    pub sdk_int: i32,
    pub kernel_version: String,
    pub brand: String,
    pub is_samsung: bool,
    pub is_oppo_vivo: bool,
}

impl SystemInfo {
    pub fn detect() -> Self {
        let android_version =
            get_prop("ro.build.version.release").unwrap_or_else(|| "Unknown".to_string());
        let sdk_int = get_prop("ro.build.version.sdk")
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(0);
        let kernel_version =
            command_stdout("uname", &["-r"]).unwrap_or_else(|| "unknown".to_string());
        let brand = get_prop("ro.product.brand").unwrap_or_default();

        let lower = brand.to_lowercase();
        let is_samsung = lower.starts_with("samsung");
        let is_oppo_vivo = ["oppo", "vivo", "realme", "iqoo"]
            .iter()
            .any(|b| lower.starts_with(b));

        SystemInfo {
            android_version,
            sdk_int,
            kernel_version,
            brand,
            is_samsung,
            is_oppo_vivo,
        }
    }

    /// Log the identity lines that open every daemon run.
    pub fn log_startup(&self) {
        log::info!(
            "[System] Android {} (API {})",
            self.android_version,
            self.sdk_int
        );
        log::info!("[System] Kernel {}", self.kernel_version);
        if !self.brand.is_empty() {
            log::info!("[System] Brand {}", self.brand);
        }
    }
}

/// Battery chore: reads capacity and temperature once a minute and logs
/// level changes. Paths are injectable so tests can point it at a fake
/// power-supply node.
pub struct BatteryMonitor {
    capacity_path: PathBuf,
    temp_path: PathBuf,
    last_capacity: i32,
    sec_remain: i32,
}

const BATTERY_CHECK_INTERVAL_SEC: i32 = 60;
/// Tenths of a degree Celsius, the unit of the kernel temp node.
const BATTERY_TEMP_WARN: i32 = 450;

impl BatteryMonitor {
    pub fn new() -> Self {
        Self::with_paths(
            PathBuf::from("/sys/class/power_supply/battery/capacity"),
            PathBuf::from("/sys/class/power_supply/battery/temp"),
        )
    }

    pub fn with_paths(capacity_path: PathBuf, temp_path: PathBuf) -> Self {
        BatteryMonitor {
            capacity_path,
            temp_path,
            last_capacity: -1,
            sec_remain: BATTERY_CHECK_INTERVAL_SEC,
        }
    }

    /// Called once per second from the scheduler's chore phase.
    pub fn tick_1s(&mut self) {
        self.sec_remain -= 1;
        if self.sec_remain > 0 {
            return;
        }
        self.sec_remain = BATTERY_CHECK_INTERVAL_SEC;
        self.check_now();
    }

    fn check_now(&mut self) {
        let capacity = read_int(&self.capacity_path);
        let temp = read_int(&self.temp_path);

        if let Some(capacity) = capacity {
            if capacity != self.last_capacity {
                match temp {
                    Some(t) => log::info!("[Battery] {}% {:.1}C", capacity, t as f32 / 10.0),
                    None => log::info!("[Battery] {}%", capacity),
                }
                self.last_capacity = capacity;
            }
        }

        if let Some(t) = temp {
            if t >= BATTERY_TEMP_WARN {
                log::warn!("[Battery] Temperature high: {:.1}C", t as f32 / 10.0);
            }
        }
    }
}

impl Default for BatteryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn read_int(path: &PathBuf) -> Option<i32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
}
