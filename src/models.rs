//! Core data types for frostd.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Per-app freeze policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreezeMode {
    /// Kill background processes outright.
    Terminate,
    /// Suspend with SIGSTOP.
    Signal,
    /// Suspend with SIGSTOP and revoke network.
    SignalBreak,
    /// Suspend through the kernel cgroup freezer.
    Freezer,
    /// Cgroup freezer plus network revocation.
    FreezerBreak,
    /// Never touched.
    Whitelist,
    /// Never touched, pinned by the system.
    Whiteforce,
}

impl FreezeMode {
    pub fn describe(&self) -> &'static str {
        match self {
            FreezeMode::Terminate => "kill background",
            FreezeMode::Signal => "SIGSTOP freeze",
            FreezeMode::SignalBreak => "SIGSTOP freeze + network break",
            FreezeMode::Freezer => "freezer freeze",
            FreezeMode::FreezerBreak => "freezer freeze + network break",
            FreezeMode::Whitelist => "free background",
            FreezeMode::Whiteforce => "free background (pinned)",
        }
    }
}

impl fmt::Display for FreezeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

impl FromStr for FreezeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminate" => Ok(FreezeMode::Terminate),
            "signal" => Ok(FreezeMode::Signal),
            "signal-break" => Ok(FreezeMode::SignalBreak),
            "freezer" => Ok(FreezeMode::Freezer),
            "freezer-break" => Ok(FreezeMode::FreezerBreak),
            "whitelist" => Ok(FreezeMode::Whitelist),
            "whiteforce" => Ok(FreezeMode::Whiteforce),
            _ => Err(format!("Unknown freeze mode: {}", s)),
        }
    }
}

/// Kernel freezing mechanism selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMode {
    /// SIGSTOP for everything, no cgroup involvement.
    GlobalSigstop,
    /// cgroup v1 freezer mounted by this daemon.
    V1,
    /// cgroup v1 freezer combined with SIGSTOP.
    V1St,
    /// cgroup v2 per-uid/pid freeze nodes.
    V2Uid,
    /// cgroup v2 frozen/unfrozen partition.
    V2Frozen,
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkMode::GlobalSigstop => "Global SIGSTOP",
            WorkMode::V1 => "FreezerV1 (FROZEN)",
            WorkMode::V1St => "FreezerV1 (FRZ+ST)",
            WorkMode::V2Uid => "FreezerV2 (UID)",
            WorkMode::V2Frozen => "FreezerV2 (FROZEN)",
        };
        f.write_str(s)
    }
}

impl WorkMode {
    pub fn is_v1(&self) -> bool {
        matches!(self, WorkMode::V1 | WorkMode::V1St)
    }
}

/// One managed application and its runtime bookkeeping.
///
/// `pids` is only trustworthy right after a procfs refresh for this uid;
/// the executor refreshes it before every freeze.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedApp {
    pub uid: i32,
    pub package: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "mode")]
    pub freeze_mode: FreezeMode,
    #[serde(rename = "tolerant", default)]
    pub is_tolerant: bool,

    #[serde(skip)]
    pub pids: Vec<i32>,
    /// Whether the last executor action left this app quiesced.
    #[serde(skip)]
    pub is_frozen: bool,
    #[serde(skip)]
    pub start_ts: u64,
    #[serde(skip)]
    pub stop_ts: u64,
    #[serde(skip)]
    pub total_running_time: u64,
    #[serde(skip)]
    pub fail_freeze_count: u32,
}

impl ManagedApp {
    pub fn new(uid: i32, package: impl Into<String>, mode: FreezeMode) -> Self {
        let package = package.into();
        ManagedApp {
            uid,
            label: package.clone(),
            package,
            freeze_mode: mode,
            is_tolerant: false,
            pids: Vec::new(),
            is_frozen: false,
            start_ts: 0,
            stop_ts: 0,
            total_running_time: 0,
            fail_freeze_count: 0,
        }
    }

    pub fn is_whitelist(&self) -> bool {
        matches!(
            self.freeze_mode,
            FreezeMode::Whitelist | FreezeMode::Whiteforce
        )
    }

    pub fn is_signal_or_freezer(&self) -> bool {
        matches!(
            self.freeze_mode,
            FreezeMode::Signal
                | FreezeMode::SignalBreak
                | FreezeMode::Freezer
                | FreezeMode::FreezerBreak
        )
    }

    pub fn is_signal_mode(&self) -> bool {
        matches!(
            self.freeze_mode,
            FreezeMode::Signal | FreezeMode::SignalBreak
        )
    }

    pub fn is_freezer_mode(&self) -> bool {
        matches!(
            self.freeze_mode,
            FreezeMode::Freezer | FreezeMode::FreezerBreak
        )
    }

    pub fn is_terminate_mode(&self) -> bool {
        self.freeze_mode == FreezeMode::Terminate
    }

    pub fn needs_break_network(&self) -> bool {
        matches!(
            self.freeze_mode,
            FreezeMode::SignalBreak | FreezeMode::FreezerBreak
        )
    }
}

/// Registry of managed applications, keyed by uid with a package index.
///
/// The registry itself is maintained by the companion app; the daemon loads
/// it read-mostly and only mutates runtime bookkeeping fields.
#[derive(Debug, Default)]
pub struct AppRegistry {
    apps: HashMap<i32, ManagedApp>,
    by_package: HashMap<String, i32>,
    home_package: Option<String>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry from a JSON file (an array of app entries).
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::IoError(e)
            }
        })?;
        let apps: Vec<ManagedApp> = serde_json::from_str(&content)?;
        let mut registry = Self::new();
        for mut app in apps {
            if app.label.is_empty() {
                app.label = app.package.clone();
            }
            registry.insert(app);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, app: ManagedApp) {
        self.by_package.insert(app.package.clone(), app.uid);
        self.apps.insert(app.uid, app);
    }

    pub fn contains(&self, uid: i32) -> bool {
        self.apps.contains_key(&uid)
    }

    pub fn get(&self, uid: i32) -> Option<&ManagedApp> {
        self.apps.get(&uid)
    }

    pub fn get_mut(&mut self, uid: i32) -> Option<&mut ManagedApp> {
        self.apps.get_mut(&uid)
    }

    pub fn uid_for(&self, package: &str) -> Option<i32> {
        self.by_package.get(package).copied()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedApp> {
        self.apps.values()
    }

    /// All managed uids that are not whitelisted.
    pub fn freezable_uids(&self) -> std::collections::BTreeSet<i32> {
        self.apps
            .values()
            .filter(|a| !a.is_whitelist())
            .map(|a| a.uid)
            .collect()
    }

    pub fn has_home_package(&self) -> bool {
        self.home_package.is_some()
    }

    pub fn home_package(&self) -> Option<&str> {
        self.home_package.as_deref()
    }

    pub fn update_home_package(&mut self, package: impl Into<String>) {
        let package = package.into();
        log::info!("[Registry] Home package: {}", package);
        self.home_package = Some(package);
    }
}
