//! Freezer backends: capability probing, mounting, and selection.
//!
//! Five mechanisms can quiesce an app, from the cgroup v2 frozen/unfrozen
//! partition down to plain SIGSTOP. Which ones exist depends on the kernel,
//! so each backend has a probe, the v1 and v2 partitions can be prepared by
//! the daemon itself, and startup picks the best usable one (honouring an
//! explicit user choice first).

pub mod executor;

pub use executor::{Apply, Freezer};

use crate::config::ConfiguredMode;
use crate::error::BackendError;
use crate::models::WorkMode;
use nix::mount::{mount, MsFlags};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

/// Filesystem layout of the cgroup freezer nodes. Roots are injectable so
/// tests can run against a synthetic tree.
#[derive(Debug, Clone)]
pub struct CgroupPaths {
    v2_root: PathBuf,
    v1_root: PathBuf,
}

impl Default for CgroupPaths {
    fn default() -> Self {
        CgroupPaths {
            v2_root: PathBuf::from("/sys/fs/cgroup"),
            v1_root: PathBuf::from("/dev/jark_freezer"),
        }
    }
}

impl CgroupPaths {
    pub fn new(v2_root: impl Into<PathBuf>, v1_root: impl Into<PathBuf>) -> Self {
        CgroupPaths {
            v2_root: v2_root.into(),
            v1_root: v1_root.into(),
        }
    }

    pub fn v1_root(&self) -> &Path {
        &self.v1_root
    }

    pub fn v2_frozen_freeze(&self) -> PathBuf {
        self.v2_root.join("frozen/cgroup.freeze")
    }

    pub fn v2_unfrozen_freeze(&self) -> PathBuf {
        self.v2_root.join("unfrozen/cgroup.freeze")
    }

    pub fn v2_frozen_procs(&self) -> PathBuf {
        self.v2_root.join("frozen/cgroup.procs")
    }

    pub fn v2_unfrozen_procs(&self) -> PathBuf {
        self.v2_root.join("unfrozen/cgroup.procs")
    }

    /// The uid_0 node doubles as the presence probe for the per-uid layout.
    pub fn v2_uid_probe(&self) -> PathBuf {
        self.v2_root.join("uid_0/cgroup.freeze")
    }

    /// Per-process freeze node. Writing `uid_<u>/cgroup.freeze` directly can
    /// leave processes unthawable, so only the pid-scoped node is used.
    pub fn v2_uid_pid_freeze(&self, uid: i32, pid: i32) -> PathBuf {
        self.v2_root
            .join(format!("uid_{}/pid_{}/cgroup.freeze", uid, pid))
    }

    pub fn v1_frozen_procs(&self) -> PathBuf {
        self.v1_root.join("frozen/cgroup.procs")
    }

    pub fn v1_unfrozen_procs(&self) -> PathBuf {
        self.v1_root.join("unfrozen/cgroup.procs")
    }

    pub fn v1_frozen_state(&self) -> PathBuf {
        self.v1_root.join("frozen/freezer.state")
    }

    pub fn v1_unfrozen_state(&self) -> PathBuf {
        self.v1_root.join("unfrozen/freezer.state")
    }

    pub fn v1_killable(&self) -> PathBuf {
        self.v1_root.join("frozen/freezer.killable")
    }
}

/// Append one pid to a cgroup procs-style file.
pub(crate) fn write_pid(path: &Path, pid: i32) -> Result<(), BackendError> {
    let write = || -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(format!("{}\n", pid).as_bytes())
    };
    write().map_err(|source| BackendError::WriteFailed {
        path: path.display().to_string(),
        source,
    })
}

pub(crate) fn write_str(path: &Path, value: &str) -> Result<(), BackendError> {
    fs::write(path, value).map_err(|source| BackendError::WriteFailed {
        path: path.display().to_string(),
        source,
    })
}

/// Is the frozen/unfrozen v2 partition present right now?
pub fn probe_v2_frozen(paths: &CgroupPaths) -> bool {
    paths.v2_frozen_freeze().exists() && paths.v2_unfrozen_freeze().exists()
}

/// Is the per-uid v2 hierarchy present?
pub fn probe_v2_uid(paths: &CgroupPaths) -> bool {
    paths.v2_uid_probe().exists()
}

/// Probe the v2 frozen/unfrozen partition, creating and arming it when the
/// kernel supports v2 but the two groups have not been made yet.
pub fn prepare_v2_frozen(paths: &CgroupPaths) -> bool {
    if probe_v2_frozen(paths) {
        log::info!("[Freezer] Native FreezerV2 (FROZEN) support");
        return true;
    }

    let _ = fs::create_dir_all(paths.v2_root.join("frozen"));
    let _ = fs::create_dir_all(paths.v2_root.join("unfrozen"));
    sleep(Duration::from_millis(500));

    if !probe_v2_frozen(paths) {
        return false;
    }

    match write_str(&paths.v2_frozen_freeze(), "1") {
        Ok(()) => log::info!("[Freezer] Armed FreezerV2 (FROZEN) group"),
        Err(e) => log::warn!("[Freezer] Arming FreezerV2 (FROZEN) failed: {}", e),
    }
    match write_str(&paths.v2_unfrozen_freeze(), "0") {
        Ok(()) => log::info!("[Freezer] Armed FreezerV2 (UNFROZEN) group"),
        Err(e) => log::warn!("[Freezer] Arming FreezerV2 (UNFROZEN) failed: {}", e),
    }

    probe_v2_frozen(paths)
}

/// Mount and populate the daemon-private v1 freezer hierarchy.
pub fn mount_v1(paths: &CgroupPaths) -> bool {
    if paths.v1_frozen_procs().exists() && paths.v1_unfrozen_procs().exists() {
        return true;
    }

    let root = paths.v1_root();
    let _ = fs::create_dir_all(root);
    if let Err(e) = mount(
        Some("freezer"),
        root,
        Some("cgroup"),
        MsFlags::empty(),
        Some("freezer"),
    ) {
        log::debug!("[Freezer] mount({}) returned {}", root.display(), e);
    }
    sleep(Duration::from_millis(100));

    let _ = fs::create_dir_all(root.join("frozen"));
    let _ = fs::create_dir_all(root.join("unfrozen"));
    sleep(Duration::from_millis(100));

    if let Err(e) = write_str(&paths.v1_frozen_state(), "FROZEN") {
        log::warn!("[Freezer] Setting v1 frozen state failed: {}", e);
    }
    if let Err(e) = write_str(&paths.v1_unfrozen_state(), "THAWED") {
        log::warn!("[Freezer] Setting v1 unfrozen state failed: {}", e);
    }
    // Older kernels do not have freezer.killable; that is fine.
    if let Err(e) = write_str(&paths.v1_killable(), "1") {
        log::debug!("[Freezer] freezer.killable unavailable: {}", e);
    }
    sleep(Duration::from_millis(100));

    paths.v1_frozen_procs().exists() && paths.v1_unfrozen_procs().exists()
}

/// Pick the backend for this run: the configured mode if its prerequisite
/// holds, otherwise V2FROZEN, then V2UID, then global SIGSTOP. V1 can leave
/// app memory pinned on some kernels, so it is never auto-selected.
pub fn select_work_mode(choice: ConfiguredMode, paths: &CgroupPaths) -> WorkMode {
    if probe_v2_uid(paths) {
        log::info!("[Freezer] Native FreezerV2 (UID) support");
    }
    let v2_frozen_ok = prepare_v2_frozen(paths);

    match choice {
        ConfiguredMode::GlobalSigstop => {
            log::info!("[Freezer] Global SIGSTOP configured; freezer policies act as SIGSTOP");
            return WorkMode::GlobalSigstop;
        }
        ConfiguredMode::V1 => {
            if mount_v1(paths) {
                return WorkMode::V1;
            }
            log::warn!("[Freezer] Configured FreezerV1 (FROZEN) unavailable");
        }
        ConfiguredMode::V1St => {
            if mount_v1(paths) {
                return WorkMode::V1St;
            }
            log::warn!("[Freezer] Configured FreezerV1 (FRZ+ST) unavailable");
        }
        ConfiguredMode::V2uid => {
            if probe_v2_uid(paths) {
                return WorkMode::V2Uid;
            }
            log::warn!("[Freezer] Configured FreezerV2 (UID) unavailable");
        }
        ConfiguredMode::V2frozen => {
            if v2_frozen_ok {
                return WorkMode::V2Frozen;
            }
            log::warn!("[Freezer] Configured FreezerV2 (FROZEN) unavailable");
        }
        ConfiguredMode::Auto => {}
    }

    if v2_frozen_ok {
        WorkMode::V2Frozen
    } else if probe_v2_uid(paths) {
        WorkMode::V2Uid
    } else {
        WorkMode::GlobalSigstop
    }
}
