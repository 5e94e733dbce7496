//! Procfs scanner: which managed processes exist and what state they are in.
//!
//! Every query is a single fresh walk over `/proc`; nothing is cached, since
//! process lifetimes race with the daemon by design. Entries that vanish or
//! fail to stat mid-walk are skipped, partial results are fine.

use crate::models::AppRegistry;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Kernel wait channels that indicate a task is quiesced.
pub const FROZEN_WCHANS: [&str; 5] = [
    "do_freezer_trap",
    "__refrigerator",
    "do_signal_stop",
    "get_signal",
    "ptrace_stop",
];

/// Wait channels of tasks that look parked but are in fact serviceable,
/// i.e. a frozen app sitting in one of these has escaped the freezer.
pub const SUSPECT_WCHANS: [&str; 4] = [
    "binder_ioctl_write_read",
    "pipe_wait",
    "SyS_epoll_wait",
    "do_epoll_wait",
];

pub fn is_frozen_wchan(wchan: &str) -> bool {
    FROZEN_WCHANS.contains(&wchan)
}

pub fn is_suspect_wchan(wchan: &str) -> bool {
    SUSPECT_WCHANS.contains(&wchan)
}

/// Pids at or below this are kernel threads and core system daemons,
/// never app processes.
const MIN_APP_PID: i32 = 100;

/// One matching process from an audit walk.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub uid: i32,
    pub pid: i32,
    pub wchan: String,
}

/// Walks a proc filesystem root. The root is injectable so tests can point
/// the scanner at a synthetic tree.
#[derive(Debug, Clone)]
pub struct ProcScanner {
    root: PathBuf,
}

impl Default for ProcScanner {
    fn default() -> Self {
        ProcScanner {
            root: PathBuf::from("/proc"),
        }
    }
}

impl ProcScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ProcScanner { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Does `/proc/<pid>` still exist?
    pub fn pid_alive(&self, pid: i32) -> bool {
        self.root.join(pid.to_string()).exists()
    }

    /// All pids owned by `uid` whose cmdline starts with `package` followed
    /// by `:` or NUL (main process or one of its `:sub` processes).
    pub fn pids_for(&self, uid: i32, package: &str) -> Vec<i32> {
        let mut pids = Vec::new();
        self.walk(|pid, owner, dir| {
            if owner == uid as u32 && cmdline_matches(dir, package) {
                pids.push(pid);
            }
        });
        pids
    }

    /// One walk, many apps: running pids grouped per uid.
    pub fn running_pids(
        &self,
        registry: &AppRegistry,
        uids: &BTreeSet<i32>,
    ) -> HashMap<i32, Vec<i32>> {
        let mut found: HashMap<i32, Vec<i32>> = HashMap::new();
        self.walk(|pid, owner, dir| {
            let uid = owner as i32;
            if !uids.contains(&uid) {
                return;
            }
            let Some(app) = registry.get(uid) else { return };
            if cmdline_matches(dir, &app.package) {
                found.entry(uid).or_default().push(pid);
            }
        });
        found
    }

    /// One walk, many apps: which of `uids` has at least one live process.
    pub fn running_uids(&self, registry: &AppRegistry, uids: &BTreeSet<i32>) -> BTreeSet<i32> {
        let mut found = BTreeSet::new();
        self.walk(|_pid, owner, dir| {
            let uid = owner as i32;
            if !uids.contains(&uid) || found.contains(&uid) {
                return;
            }
            let Some(app) = registry.get(uid) else { return };
            if cmdline_matches(dir, &app.package) {
                found.insert(uid);
            }
        });
        found
    }

    /// Single walk returning (uid, pid, wchan) for every process whose uid
    /// passes `pred` and whose cmdline matches its registry package.
    pub fn scan_for_audit(
        &self,
        registry: &AppRegistry,
        mut pred: impl FnMut(i32) -> bool,
    ) -> Vec<AuditRecord> {
        let mut records = Vec::new();
        self.walk(|pid, owner, dir| {
            let uid = owner as i32;
            if !pred(uid) {
                return;
            }
            let Some(app) = registry.get(uid) else { return };
            if !cmdline_matches(dir, &app.package) {
                return;
            }
            let Some(wchan) = read_proc_string(&dir.join("wchan")) else {
                return;
            };
            records.push(AuditRecord { uid, pid, wchan });
        });
        records
    }

    /// The wait channel of one pid, if it can still be read.
    pub fn wchan(&self, pid: i32) -> Option<String> {
        read_proc_string(&self.root.join(pid.to_string()).join("wchan"))
    }

    /// The raw cmdline of one pid (NUL separators intact).
    pub fn cmdline(&self, pid: i32) -> Option<String> {
        read_proc_string(&self.root.join(pid.to_string()).join("cmdline"))
    }

    /// Resident memory of one pid in MiB, from the second statm field.
    pub fn resident_mib(&self, pid: i32) -> Option<i32> {
        let statm = fs::read_to_string(self.root.join(pid.to_string()).join("statm")).ok()?;
        let pages: i64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        // 4 KiB pages to MiB.
        Some((pages >> 8) as i32)
    }

    fn walk(&self, mut visit: impl FnMut(i32, u32, &Path)) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[Proc] Cannot open {}: {}", self.root.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(pid) = name.parse::<i32>() else { continue };
            if pid <= MIN_APP_PID {
                continue;
            }
            let dir = entry.path();
            let Ok(meta) = fs::metadata(&dir) else { continue };
            visit(pid, meta.uid(), &dir);
        }
    }
}

/// cmdline must start with the package name and the next byte must be `:`
/// (a sub-process like `com.foo:push`) or NUL/end (the main process).
fn cmdline_matches(dir: &Path, package: &str) -> bool {
    let Ok(raw) = fs::read(dir.join("cmdline")) else {
        return false;
    };
    if raw.is_empty() || !raw.starts_with(package.as_bytes()) {
        return false;
    }
    match raw.get(package.len()) {
        None | Some(0) | Some(b':') => true,
        Some(_) => false,
    }
}

fn read_proc_string(path: &Path) -> Option<String> {
    let raw = fs::read(path).ok()?;
    let text: String = String::from_utf8_lossy(&raw)
        .trim_end_matches('\0')
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FreezeMode, ManagedApp};
    use std::os::unix::fs::MetadataExt;

    fn fake_proc(dir: &Path, pid: i32, cmdline: &[u8]) {
        let proc_dir = dir.join(pid.to_string());
        fs::create_dir_all(&proc_dir).unwrap();
        fs::write(proc_dir.join("cmdline"), cmdline).unwrap();
    }

    fn my_uid(dir: &Path) -> i32 {
        fs::metadata(dir).unwrap().uid() as i32
    }

    #[test]
    fn test_pids_for_filters_cmdline_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fake_proc(root, 1234, b"com.example.app\0");
        fake_proc(root, 1235, b"com.example.app:push\0");
        fake_proc(root, 1236, b"com.example.appendix\0");
        fake_proc(root, 42, b"com.example.app\0"); // below the pid floor
        fs::write(root.join("self"), "").ok();

        let scanner = ProcScanner::new(root);
        let uid = my_uid(&root.join("1234"));
        let mut pids = scanner.pids_for(uid, "com.example.app");
        pids.sort_unstable();
        assert_eq!(pids, vec![1234, 1235]);
    }

    #[test]
    fn test_running_uids_one_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fake_proc(root, 2000, b"com.example.app\0");

        let scanner = ProcScanner::new(root);
        let uid = my_uid(&root.join("2000"));

        let mut registry = AppRegistry::new();
        registry.insert(ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer));
        registry.insert(ManagedApp::new(uid + 1, "com.absent.app", FreezeMode::Freezer));

        let uids: BTreeSet<i32> = [uid, uid + 1].into_iter().collect();
        let running = scanner.running_uids(&registry, &uids);
        assert!(running.contains(&uid));
        assert!(!running.contains(&(uid + 1)));
    }

    #[test]
    fn test_scan_for_audit_reads_wchan() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fake_proc(root, 3000, b"com.example.app\0");
        fs::write(root.join("3000").join("wchan"), "do_freezer_trap").unwrap();

        let scanner = ProcScanner::new(root);
        let uid = my_uid(&root.join("3000"));
        let mut registry = AppRegistry::new();
        registry.insert(ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer));

        let records = scanner.scan_for_audit(&registry, |u| u == uid);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pid, 3000);
        assert!(is_frozen_wchan(&records[0].wchan));
        assert!(!is_suspect_wchan(&records[0].wchan));
    }

    #[test]
    fn test_resident_mib_parses_statm() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fake_proc(root, 4000, b"com.example.app\0");
        // 25600 resident pages = 100 MiB
        fs::write(root.join("4000").join("statm"), "40000 25600 800 1 0 300 0").unwrap();

        let scanner = ProcScanner::new(root);
        assert_eq!(scanner.resident_mib(4000), Some(100));
    }

    #[test]
    fn test_wchan_classification_tables() {
        for w in FROZEN_WCHANS {
            assert!(is_frozen_wchan(w));
        }
        for w in SUSPECT_WCHANS {
            assert!(!is_frozen_wchan(w));
            assert!(is_suspect_wchan(w));
        }
        assert!(!is_frozen_wchan("ep_poll"));
    }
}
