//! Daemon settings: load, validate, persist.
//!
//! Settings live in a TOML file under the daemon directory. A missing file
//! is replaced by defaults (and written back); out-of-range values are
//! clamped to their nearest bound, with each clamp logged so the user can
//! see what the daemon actually runs with.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Wakeup timeline sentinel: this many minutes means "never wake periodically".
pub const WAKEUP_DISABLED_MIN: i32 = 120;

/// Backend requested in the settings file. `Auto` lets the probe ladder
/// decide; V1 variants are honoured only when chosen explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfiguredMode {
    #[default]
    Auto,
    GlobalSigstop,
    V1,
    V1St,
    V2uid,
    V2frozen,
}

/// Foreground provider requested in the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SourceChoice {
    #[default]
    Auto,
    Socket,
    ActivityStack,
    Lru,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub work_mode: ConfiguredMode,
    pub foreground_source: SourceChoice,
    /// Seconds an app stays in the pending queue before a freeze.
    pub freeze_timeout: i32,
    /// Seconds before TERMINATE-mode apps are killed.
    pub terminate_timeout: i32,
    /// Seconds between re-freeze audits.
    pub refreeze_timeout: i32,
    /// Minutes between periodic thaws; `WAKEUP_DISABLED_MIN` disables.
    pub wakeup_timeout_min: i32,
    pub hook_socket: PathBuf,
    /// `/dev/input/event<N>` nodes observed for interaction pulses.
    pub input_events: Vec<u32>,
    pub log_file: PathBuf,
    pub battery_check: bool,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            work_mode: ConfiguredMode::Auto,
            foreground_source: SourceChoice::Auto,
            freeze_timeout: 10,
            terminate_timeout: 30,
            refreeze_timeout: 60,
            wakeup_timeout_min: 30,
            hook_socket: PathBuf::from("/dev/socket/frostd_hook"),
            input_events: vec![1, 2],
            log_file: PathBuf::from("/sdcard/Android/frostd.log"),
            battery_check: true,
            verbose: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`, writing defaults back when the file does
    /// not exist. Parse failures are real errors; a broken settings file
    /// should be fixed, not silently replaced.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let settings = Settings::default();
                if let Err(e) = settings.save(path) {
                    eprintln!(
                        "[Config] Could not write default settings to {}: {}",
                        path.display(),
                        e
                    );
                }
                return Ok(settings);
            }
            Err(e) => return Err(ConfigError::IoError(e)),
        };

        let mut settings: Settings = toml::from_str(&content)?;
        settings.clamp_ranges();
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
            }
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::IoError)?;
        Ok(())
    }

    /// Clamp every numeric knob into its sane range, logging each clamp.
    pub fn clamp_ranges(&mut self) {
        clamp(&mut self.freeze_timeout, "freeze_timeout", 0, 3600);
        clamp(&mut self.terminate_timeout, "terminate_timeout", 3, 3600);
        clamp(&mut self.refreeze_timeout, "refreeze_timeout", 5, 86400);
        clamp(&mut self.wakeup_timeout_min, "wakeup_timeout_min", 2, 120);
    }

    /// Whether the periodic wakeup timeline is in use at all.
    pub fn wakeup_enabled(&self) -> bool {
        self.wakeup_timeout_min != WAKEUP_DISABLED_MIN
    }
}

fn clamp(value: &mut i32, name: &str, min: i32, max: i32) {
    let clamped = (*value).clamp(min, max);
    if clamped != *value {
        log::warn!(
            "[Config] {} = {} out of range, clamped to {}",
            name,
            value,
            clamped
        );
        *value = clamped;
    }
}
