//! Scheduler behaviour over fake proc and cgroup trees.
//!
//! These tests drive `Scheduler::tick` directly (two ticks per chore
//! second) with a scripted foreground source and doze supervisor, and
//! observe the backend through the files the executor writes.

use crossbeam_channel::{unbounded, Sender};
use frostd::doze::DozeSupervisor;
use frostd::error::SourceError;
use frostd::foreground::ForegroundSource;
use frostd::scheduler::Scheduler;
use frostd::watcher::Touch;
use frostd::{
    AppRegistry, CgroupPaths, FreezeMode, Freezer, HookClient, ManagedApp, ProcScanner, Settings,
    WorkMode,
};
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// The uid the fake proc entries will be owned by: ours.
fn my_uid() -> i32 {
    let probe = tempfile::tempdir().unwrap();
    fs::metadata(probe.path()).unwrap().uid() as i32
}

/// Foreground provider returning whatever the test scripted last.
struct ScriptedSource(Arc<Mutex<BTreeSet<i32>>>);

impl ForegroundSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn poll(
        &mut self,
        _registry: &mut AppRegistry,
        _last: &BTreeSet<i32>,
    ) -> Result<BTreeSet<i32>, SourceError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct DozeScript {
    standby: bool,
    enter: bool,
    exit: bool,
}

struct ScriptedDoze(Arc<Mutex<DozeScript>>);

impl DozeSupervisor for ScriptedDoze {
    fn is_screen_off_standby(&self) -> bool {
        self.0.lock().unwrap().standby
    }

    fn check_if_need_to_enter(&mut self) -> bool {
        let mut s = self.0.lock().unwrap();
        if !s.standby && s.enter {
            s.enter = false;
            s.standby = true;
            return true;
        }
        false
    }

    fn check_if_need_to_exit(&mut self) -> bool {
        let mut s = self.0.lock().unwrap();
        if s.standby && s.exit {
            s.exit = false;
            s.standby = false;
            return true;
        }
        false
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    scheduler: Scheduler,
    fg: Arc<Mutex<BTreeSet<i32>>>,
    doze: Arc<Mutex<DozeScript>>,
    touch_tx: Sender<Touch>,
    paths: CgroupPaths,
    proc_root: PathBuf,
}

impl Harness {
    fn new(settings: Settings, apps: Vec<ManagedApp>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let proc_root = tmp.path().join("proc");
        fs::create_dir_all(&proc_root).unwrap();
        let paths = CgroupPaths::new(tmp.path().join("cgroup"), tmp.path().join("v1"));
        for sub in ["frozen", "unfrozen"] {
            fs::create_dir_all(tmp.path().join("cgroup").join(sub)).unwrap();
        }

        let mut registry = AppRegistry::new();
        for app in apps {
            registry.insert(app);
        }

        let scanner = ProcScanner::new(&proc_root);
        let hook = HookClient::new(tmp.path().join("no_hook.sock"));
        let freezer = Freezer::new(
            WorkMode::V2Frozen,
            paths.clone(),
            scanner.clone(),
            hook.clone(),
        );

        let (touch_tx, touch_rx) = unbounded();
        let fg = Arc::new(Mutex::new(BTreeSet::new()));
        let doze = Arc::new(Mutex::new(DozeScript::default()));

        let scheduler = Scheduler::new(
            settings,
            registry,
            freezer,
            scanner,
            Box::new(ScriptedSource(fg.clone())),
            Box::new(ScriptedDoze(doze.clone())),
            hook,
            touch_rx,
            None,
        );

        Harness {
            _tmp: tmp,
            scheduler,
            fg,
            doze,
            touch_tx,
            paths,
            proc_root,
        }
    }

    fn add_proc(&self, pid: i32, cmdline: &str, wchan: &str) {
        let dir = self.proc_root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cmdline"), format!("{}\0", cmdline)).unwrap();
        fs::write(dir.join("wchan"), wchan).unwrap();
        fs::write(dir.join("statm"), "2000 256 100 1 0 100 0").unwrap();
    }

    fn set_foreground(&self, uids: &[i32]) {
        *self.fg.lock().unwrap() = uids.iter().copied().collect();
        // A real transition always comes with watcher activity.
        let _ = self.touch_tx.send(Touch);
    }

    fn tick_secs(&mut self, secs: u32) {
        for _ in 0..(secs * 2) {
            self.scheduler.tick();
        }
    }

    fn frozen_writes(&self) -> Vec<String> {
        read_lines(&self.paths.v2_frozen_procs())
    }

    fn unfrozen_writes(&self) -> Vec<String> {
        read_lines(&self.paths.v2_unfrozen_procs())
    }

    fn assert_no_double_queue(&self, uid: i32) {
        assert!(
            !(self.scheduler.pending_remaining(uid).is_some()
                && self.scheduler.current_foreground().contains(&uid)),
            "uid {} is both pending and foreground",
            uid
        );
    }
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn settings(freeze_timeout: i32, wakeup_timeout_min: i32) -> Settings {
    Settings {
        freeze_timeout,
        wakeup_timeout_min,
        terminate_timeout: 30,
        refreeze_timeout: 60,
        ..Settings::default()
    }
}

#[test]
fn short_background_trip_causes_no_freeze() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(5, 120),
        vec![ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer)],
    );
    h.add_proc(1501, "com.example.app", "ep_poll");

    h.set_foreground(&[uid]);
    h.tick_secs(1);
    assert!(h.scheduler.current_foreground().contains(&uid));

    h.set_foreground(&[]);
    h.tick_secs(1);
    assert_eq!(h.scheduler.pending_remaining(uid), Some(4));
    h.assert_no_double_queue(uid);

    // Back on screen before the countdown ran out: entry vanishes, no
    // freeze, and no thaw either because nothing was frozen.
    h.set_foreground(&[uid]);
    h.tick_secs(1);
    assert_eq!(h.scheduler.pending_remaining(uid), None);
    assert!(h.frozen_writes().is_empty());
    assert!(h.unfrozen_writes().is_empty());
    h.assert_no_double_queue(uid);
}

#[test]
fn expiry_freezes_then_timeline_thaws_and_requeues() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(2, 2), // freeze after 2 s, wake 120 s later
        vec![ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer)],
    );
    // Frozen wchan so the re-freeze audit leaves the app alone.
    h.add_proc(1501, "com.example.app", "do_freezer_trap");

    h.set_foreground(&[uid]);
    h.tick_secs(1);
    h.set_foreground(&[]);
    h.tick_secs(2);
    assert_eq!(h.frozen_writes(), vec!["1501"]);
    assert_eq!(h.scheduler.pending_remaining(uid), None);
    assert!(h.scheduler.registry().get(uid).unwrap().is_frozen);

    let slot = h.scheduler.timeline().slot_of(uid).expect("wakeup scheduled");
    assert_eq!(h.scheduler.timeline().slot(slot), uid);
    assert!(h.scheduler.timeline().is_consistent());

    // Drive chore seconds until the wakeup window fires.
    let mut waited = 0;
    while h.unfrozen_writes().is_empty() {
        h.tick_secs(1);
        waited += 1;
        assert!(waited <= 125, "wakeup never fired");
    }
    assert!(waited >= 115, "wakeup fired far too early ({} s)", waited);
    assert_eq!(h.unfrozen_writes(), vec!["1501"]);
    // The thawed app counts down toward its next freeze.
    assert_eq!(h.scheduler.pending_remaining(uid), Some(2));
    assert_eq!(h.scheduler.timeline().slot_of(uid), None);
    assert!(h.scheduler.timeline().is_consistent());
}

#[test]
fn binder_busy_backs_off_exponentially() {
    let uid = my_uid();
    let mut app = ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer);
    app.is_tolerant = true;
    let mut h = Harness::new(settings(1, 120), vec![app]);
    h.add_proc(1501, "com.example.app", "ep_poll");

    h.set_foreground(&[uid]);
    h.tick_secs(1);
    h.set_foreground(&[]);
    h.tick_secs(1);

    // First attempt answered busy: count bumped to 1, countdown 15 << 1.
    assert_eq!(h.scheduler.pending_remaining(uid), Some(30));
    assert_eq!(h.scheduler.registry().get(uid).unwrap().fail_freeze_count, 1);
    assert!(h.frozen_writes().is_empty());
    assert_eq!(h.scheduler.timeline().slot_of(uid), None);

    // Second attempt doubles again.
    h.tick_secs(30);
    assert_eq!(h.scheduler.pending_remaining(uid), Some(60));
    assert_eq!(h.scheduler.registry().get(uid).unwrap().fail_freeze_count, 2);
}

#[test]
fn doze_parks_and_restores_the_foreground() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(10, 120),
        vec![
            ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer),
            ManagedApp::new(10200, "com.other.app", FreezeMode::Signal),
        ],
    );
    h.add_proc(1501, "com.example.app", "ep_poll");

    h.set_foreground(&[uid]);
    h.tick_secs(1);
    assert!(h.scheduler.current_foreground().contains(&uid));

    // Standby begins: the visible set is parked and counts down like any
    // backgrounded app.
    h.doze.lock().unwrap().enter = true;
    h.tick_secs(1);
    assert!(h.scheduler.current_foreground().is_empty());
    assert_eq!(h.scheduler.pending_remaining(uid), Some(10));

    // Interaction ends standby: the parked set comes back and the pending
    // entry is dropped without any thaw, since nothing froze yet.
    h.doze.lock().unwrap().exit = true;
    h.set_foreground(&[uid]);
    h.tick_secs(1);
    assert!(h.scheduler.current_foreground().contains(&uid));
    assert_eq!(h.scheduler.pending_remaining(uid), None);
    assert!(h.unfrozen_writes().is_empty());
    h.assert_no_double_queue(uid);
}

#[test]
fn escapee_is_requeued_and_refrozen() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(10, 120),
        vec![ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer)],
    );
    // Running wchan on a backgrounded, unqueued app: an escapee.
    h.add_proc(1501, "com.example.app", "binder_ioctl_write_read");

    let report = h.scheduler.report_proc_state();
    assert!(report.contains("running(binder_ioctl_write_read)"));

    // The report pulls the audit forward; the next chore second queues the
    // escapee with a one-second countdown, the one after freezes it.
    h.tick_secs(1);
    assert_eq!(h.scheduler.pending_remaining(uid), Some(1));
    h.tick_secs(1);
    assert_eq!(h.frozen_writes(), vec!["1501"]);
    assert_eq!(h.scheduler.pending_remaining(uid), None);
}

#[test]
fn properly_frozen_app_is_left_alone() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(10, 120),
        vec![ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer)],
    );
    h.add_proc(1501, "com.example.app", "do_freezer_trap");

    let report = h.scheduler.report_proc_state();
    assert!(report.contains("frozen(do_freezer_trap)"));

    h.tick_secs(2);
    assert_eq!(h.scheduler.pending_remaining(uid), None);
    assert!(h.frozen_writes().is_empty());
}

#[test]
fn whitelisted_app_is_immune() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(1, 30),
        vec![ManagedApp::new(uid, "com.white.app", FreezeMode::Whitelist)],
    );
    h.add_proc(1501, "com.white.app", "ep_poll");

    let report = h.scheduler.report_proc_state();
    assert!(report.contains("No managed freezable app"));

    h.tick_secs(3);
    assert_eq!(h.scheduler.pending_remaining(uid), None);
    assert!(h.frozen_writes().is_empty());
    assert_eq!(h.scheduler.timeline().slot_of(uid), None);
}

#[test]
fn zero_freeze_timeout_freezes_on_next_chore_second() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(0, 120),
        vec![ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer)],
    );
    h.add_proc(1501, "com.example.app", "ep_poll");

    h.set_foreground(&[uid]);
    h.tick_secs(1);
    h.set_foreground(&[]);
    h.tick_secs(1);
    assert_eq!(h.frozen_writes(), vec!["1501"]);
}

#[test]
fn disabled_wakeup_never_populates_the_timeline() {
    let uid = my_uid();
    let mut h = Harness::new(
        settings(1, 120), // 120 min is the "never wake" sentinel
        vec![ManagedApp::new(uid, "com.example.app", FreezeMode::Freezer)],
    );
    h.add_proc(1501, "com.example.app", "do_freezer_trap");

    h.set_foreground(&[uid]);
    h.tick_secs(1);
    h.set_foreground(&[]);
    h.tick_secs(2);
    assert_eq!(h.frozen_writes(), vec!["1501"]);
    assert_eq!(h.scheduler.timeline().slot_of(uid), None);
}
