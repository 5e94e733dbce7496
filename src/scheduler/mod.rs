//! The scheduler: a strictly serial 500 ms loop that owns all freezer state.
//!
//! Watchers only ever send touch events on a channel; everything else
//! (foreground diffing, the pending-freeze countdowns, the wakeup timeline,
//! doze coordination, the re-freeze audit) happens on this one thread, in
//! a fixed order within each tick. A tick with interaction pulses polls the
//! foreground source; every second tick runs the one-second phase (pending
//! countdowns, doze entry, battery, re-freeze audit, timeline advance).

pub mod timeline;

pub use timeline::{WakeupTimeline, TIMELINE_SLOTS};

use crate::config::Settings;
use crate::doze::DozeSupervisor;
use crate::foreground::{ActivityStackSource, ForegroundSource};
use crate::freezer::{Apply, Freezer};
use crate::hook::{HookClient, WakeupLockMode};
use crate::models::AppRegistry;
use crate::procfs::{is_frozen_wchan, ProcScanner};
use crate::system::BatteryMonitor;
use crate::watcher::Touch;
use crossbeam_channel::Receiver;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Scheduler tick period.
pub const TICK: Duration = Duration::from_millis(500);

/// Each watcher event is worth this many follow-up foreground polls.
const PULSE_BURST: i32 = 2;

/// First re-freeze audit happens this long after boot.
const REFREEZE_BOOT_DELAY_SEC: i32 = 60;

pub struct Scheduler {
    settings: Settings,
    registry: AppRegistry,
    freezer: Freezer,
    scanner: ProcScanner,
    source: Box<dyn ForegroundSource>,
    doze: Box<dyn DozeSupervisor>,
    hook: HookClient,
    touch_rx: Receiver<Touch>,
    battery: Option<BatteryMonitor>,

    pending: BTreeMap<i32, i32>,
    last_foreground: BTreeSet<i32>,
    current_foreground: BTreeSet<i32>,
    fg_backup: BTreeSet<i32>,
    naughty: Mutex<BTreeSet<i32>>,
    timeline: WakeupTimeline,
    wakeup_lock_uids: BTreeSet<i32>,

    refreeze_remain: i32,
    pulses: i32,
    half_tick: u32,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        registry: AppRegistry,
        freezer: Freezer,
        scanner: ProcScanner,
        source: Box<dyn ForegroundSource>,
        doze: Box<dyn DozeSupervisor>,
        hook: HookClient,
        touch_rx: Receiver<Touch>,
        battery: Option<BatteryMonitor>,
    ) -> Self {
        Scheduler {
            settings,
            registry,
            freezer,
            scanner,
            source,
            doze,
            hook,
            touch_rx,
            battery,
            pending: BTreeMap::new(),
            last_foreground: BTreeSet::new(),
            current_foreground: BTreeSet::new(),
            fg_backup: BTreeSet::new(),
            naughty: Mutex::new(BTreeSet::new()),
            timeline: WakeupTimeline::new(),
            wakeup_lock_uids: BTreeSet::new(),
            refreeze_remain: REFREEZE_BOOT_DELAY_SEC,
            pulses: PULSE_BURST,
            half_tick: 0,
        }
    }

    /// Run forever. The loop only ends with the process.
    pub fn run(mut self) -> ! {
        thread::sleep(Duration::from_secs(1));
        self.seed_foreground();
        self.report_proc_state();

        loop {
            thread::sleep(TICK);
            self.tick();
        }
    }

    /// One foreground poll through the activity stack before the loop
    /// starts; this is also what first captures the home package.
    pub fn seed_foreground(&mut self) {
        let mut stack = ActivityStackSource::new();
        match stack.poll(&mut self.registry, &self.last_foreground) {
            Ok(set) => {
                self.current_foreground = set;
                self.update_foreground_diff();
            }
            Err(e) => log::warn!("[Scheduler] Initial foreground poll failed: {}", e),
        }
    }

    /// One 500 ms tick. Public so tests can drive time directly.
    pub fn tick(&mut self) {
        while self.touch_rx.try_recv().is_ok() {
            self.pulses = PULSE_BURST;
        }

        if self.pulses > 0 {
            self.pulses -= 1;
            if self.doze.is_screen_off_standby() {
                if self.doze.check_if_need_to_exit() {
                    self.current_foreground = std::mem::take(&mut self.fg_backup);
                    self.update_foreground_diff();
                    self.send_wakeup_lock(WakeupLockMode::Default);
                }
            } else {
                match self.source.poll(&mut self.registry, &self.last_foreground) {
                    Ok(set) => {
                        self.current_foreground = set;
                        self.update_foreground_diff();
                    }
                    Err(e) => {
                        log::warn!("[Scheduler] {} source failed: {}", self.source.name(), e)
                    }
                }
            }
        }

        self.half_tick = self.half_tick.wrapping_add(1);
        if self.half_tick & 1 == 1 {
            return;
        }

        // The one-second phase.
        self.process_pending();

        if self.doze.check_if_need_to_enter() {
            self.fg_backup = std::mem::take(&mut self.current_foreground);
            self.update_foreground_diff();
            self.send_wakeup_lock(WakeupLockMode::Ignore);
        }
        if self.doze.is_screen_off_standby() {
            return;
        }

        if let Some(battery) = self.battery.as_mut() {
            battery.tick_1s();
        }
        self.check_refreeze();
        self.check_wakeup();
    }

    /// Thaw newly visible apps, enqueue freshly backgrounded ones.
    fn update_foreground_diff(&mut self) {
        let new_on: Vec<i32> = self
            .current_foreground
            .difference(&self.last_foreground)
            .copied()
            .collect();
        let back_off: Vec<i32> = self
            .last_foreground
            .difference(&self.current_foreground)
            .copied()
            .collect();

        if new_on.is_empty() && back_off.is_empty() {
            return;
        }
        self.last_foreground = self.current_foreground.clone();

        for uid in new_on {
            // Came back before its countdown ran out: nothing was frozen.
            if self.pending.remove(&uid).is_some() {
                continue;
            }
            if let Some(app) = self.registry.get_mut(uid) {
                app.start_ts = now_secs();
            } else {
                continue;
            }

            let result = self.apply_managed(uid, false);
            let label = self
                .registry
                .get(uid)
                .map(|a| a.label.clone())
                .unwrap_or_default();
            match result {
                Apply::Handled(n) if n > 0 => {
                    log::info!("[Scheduler] Thawed {} ({} pids)", label, n)
                }
                _ => log::info!("[Scheduler] Opened {}", label),
            }
        }

        for uid in back_off {
            let timeout = match self.registry.get(uid) {
                Some(app) if app.is_terminate_mode() => self.settings.terminate_timeout,
                Some(_) => self.settings.freeze_timeout,
                None => continue,
            };
            self.pending.insert(uid, timeout);
        }
    }

    /// Count every pending entry down; freeze the ones that reach zero.
    fn process_pending(&mut self) {
        let uids: Vec<i32> = self.pending.keys().copied().collect();
        for uid in uids {
            let Some(remain) = self.pending.get_mut(&uid) else {
                continue;
            };
            *remain -= 1;
            if *remain > 0 {
                continue;
            }

            if !self.registry.contains(uid) {
                self.pending.remove(&uid);
                continue;
            }

            match self.apply_managed(uid, true) {
                Apply::BinderBusy(pid) => {
                    let Some(app) = self.registry.get_mut(uid) else {
                        continue;
                    };
                    app.fail_freeze_count += 1;
                    let delay = 15i32 << app.fail_freeze_count.min(20);
                    let label = app.label.clone();
                    self.pending.insert(uid, delay);
                    let (value, unit) = if delay < 60 {
                        (delay, "s")
                    } else {
                        (delay / 60, "min")
                    };
                    log::info!(
                        "[Scheduler] {}:{} binder busy, freeze deferred {}{}",
                        label,
                        pid,
                        value,
                        unit
                    );
                }
                Apply::Handled(n) => {
                    self.pending.remove(&uid);
                    let now = now_secs();
                    let Some(app) = self.registry.get_mut(uid) else {
                        continue;
                    };
                    app.fail_freeze_count = 0;
                    app.stop_ts = now;
                    let delta = if app.start_ts == 0 {
                        0
                    } else {
                        now.saturating_sub(app.start_ts)
                    };
                    app.start_ts = now;
                    app.total_running_time += delta;

                    if n > 0 {
                        log::info!(
                            "[Scheduler] Froze {} ({} pids), ran {}, total {}",
                            app.label,
                            n,
                            fmt_duration(delta),
                            fmt_duration(app.total_running_time)
                        );
                    } else {
                        log::info!(
                            "[Scheduler] Closed {} after {}",
                            app.label,
                            fmt_duration(delta)
                        );
                    }
                }
            }
        }
    }

    /// Advance the timeline one second and service whatever fires.
    fn check_wakeup(&mut self) {
        let Some(uid) = self.timeline.advance() else {
            return;
        };

        if !self.registry.contains(uid) {
            self.timeline.drop_uid(uid);
            return;
        }

        let serviceable = self
            .registry
            .get(uid)
            .is_some_and(|a| a.is_signal_or_freezer());
        if !serviceable {
            self.timeline.drop_uid(uid);
            return;
        }

        match self.apply_managed(uid, false) {
            Apply::Handled(n) if n > 0 => {
                let freeze_timeout = self.settings.freeze_timeout;
                let Some(app) = self.registry.get_mut(uid) else {
                    return;
                };
                app.start_ts = now_secs();
                let label = app.label.clone();
                self.pending.insert(uid, freeze_timeout);
                log::info!("[Scheduler] Periodic thaw {} ({} pids)", label, n);
            }
            _ => {
                let label = self
                    .registry
                    .get(uid)
                    .map(|a| a.label.clone())
                    .unwrap_or_default();
                log::info!("[Scheduler] {} was killed while in background", label);
            }
        }
    }

    /// Every `refreeze_timeout` seconds, find managed apps that are neither
    /// foreground nor pending yet have a runnable process, and queue them
    /// for an immediate re-freeze.
    fn check_refreeze(&mut self) {
        self.refreeze_remain -= 1;
        if self.refreeze_remain > 0 {
            return;
        }
        self.refreeze_remain = self.settings.refreeze_timeout;

        let mut naughty = self.naughty.lock().unwrap_or_else(|e| e.into_inner());

        if naughty.is_empty() {
            let registry = &self.registry;
            let pending = &self.pending;
            let foreground = &self.current_foreground;
            let records = self.scanner.scan_for_audit(registry, |uid| {
                registry.get(uid).is_some_and(|a| !a.is_whitelist())
                    && !pending.contains_key(&uid)
                    && !foreground.contains(&uid)
            });
            for record in records {
                if !is_frozen_wchan(&record.wchan) {
                    naughty.insert(record.uid);
                }
            }
        }

        if naughty.is_empty() {
            log::info!("[Scheduler] Re-freeze audit: everything is frozen");
            return;
        }

        let mut line = String::from("[Scheduler] Re-freeze:");
        for &uid in naughty.iter() {
            self.pending.insert(uid, 1);
            if let Some(app) = self.registry.get(uid) {
                line.push(' ');
                line.push_str(&app.label);
            }
        }
        naughty.clear();
        log::info!("{}", line);
    }

    /// One procfs walk rendered as a state table: every managed freezable
    /// process with its resident size and whether it is foreground,
    /// pending, frozen (by wchan) or running. Running processes refill the
    /// naughty set and pull the next re-freeze audit forward.
    pub fn report_proc_state(&mut self) -> String {
        let mut naughty = self.naughty.lock().unwrap_or_else(|e| e.into_inner());
        naughty.clear();

        let registry = &self.registry;
        let records = self
            .scanner
            .scan_for_audit(registry, |uid| {
                registry.get(uid).is_some_and(|a| !a.is_whitelist())
            });

        let mut report = String::from("Process freeze state:\n\n   PID  MiB  state\n");
        let mut uids = BTreeSet::new();
        let mut pid_count = 0usize;
        let mut total_mib: i64 = 0;
        let mut get_signal_count = 0usize;

        for record in &records {
            let Some(app) = registry.get(record.uid) else {
                continue;
            };
            let mem = self.scanner.resident_mib(record.pid).unwrap_or(0);

            let mut label = app.label.clone();
            if let Some(cmdline) = self.scanner.cmdline(record.pid) {
                if let Some(suffix) = cmdline.strip_prefix(&app.package) {
                    if suffix.starts_with(':') {
                        label.push_str(suffix);
                    }
                }
            }

            uids.insert(record.uid);
            pid_count += 1;
            total_mib += mem as i64;

            let state = if self.current_foreground.contains(&record.uid) {
                "foreground".to_string()
            } else if let Some(remain) = self.pending.get(&record.uid) {
                format!("freezing in {}s", remain)
            } else if is_frozen_wchan(&record.wchan) {
                if record.wchan == "get_signal" {
                    get_signal_count += 1;
                }
                format!("frozen({})", record.wchan)
            } else {
                naughty.insert(record.uid);
                format!("running({})", record.wchan)
            };

            report.push_str(&format!("{:>6} {:>4}  {}  {}\n", record.pid, mem, state, label));
        }

        if uids.is_empty() {
            report.push_str("\nNo managed freezable app is running\n");
        } else {
            if !naughty.is_empty() {
                report.push_str("\nUnfrozen processes found, re-freeze scheduled\n");
                self.refreeze_remain = 0;
            }
            report.push_str(&format!(
                "\nTotal {} apps, {} processes, {:.2} GiB resident\n",
                uids.len(),
                pid_count,
                total_mib as f64 / 1024.0
            ));
            if get_signal_count > 0 {
                report.push_str("get_signal states are occasionally live rather than frozen\n");
            }
            if self.freezer.work_mode().is_v1() {
                report.push_str("V1-frozen processes can show as running in this table\n");
            }
        }

        drop(naughty);
        log::info!("[Scheduler] {}", report);
        report
    }

    /// Tell the hook how to treat wakeup locks for the running freezable
    /// uids. Entering standby rescans procfs; leaving reuses the same set.
    fn send_wakeup_lock(&mut self, mode: WakeupLockMode) {
        if mode == WakeupLockMode::Ignore {
            let freezable = self.registry.freezable_uids();
            self.wakeup_lock_uids = self.scanner.running_uids(&self.registry, &freezable);
        }
        if self.wakeup_lock_uids.is_empty() {
            return;
        }

        let uids: Vec<i32> = self.wakeup_lock_uids.iter().copied().collect();
        match self.hook.set_wakeup_lock(mode, &uids) {
            Ok(status) => log::debug!(
                "[Scheduler] Wakeup lock {:?} for {} uids acknowledged ({})",
                mode,
                uids.len(),
                status
            ),
            Err(e) => log::warn!("[Scheduler] Wakeup lock {:?} failed: {}", mode, e),
        }
    }

    /// Run the executor for one uid and keep the wakeup timeline in step:
    /// any state change clears the uid's slot, and only a completed freeze
    /// with live pids claims a new one.
    fn apply_managed(&mut self, uid: i32, freeze: bool) -> Apply {
        let Some(app) = self.registry.get_mut(uid) else {
            return Apply::Handled(0);
        };
        let on_timeline_terms = app.is_signal_or_freezer();
        let result = self.freezer.apply(app, freeze);

        if on_timeline_terms
            && self.settings.wakeup_enabled()
            && !matches!(result, Apply::BinderBusy(_))
        {
            let schedule = freeze && matches!(result, Apply::Handled(n) if n > 0);
            self.timeline.note_apply(
                uid,
                schedule,
                self.settings.wakeup_timeout_min as u32 * 60,
            );
        }
        result
    }

    // Inspection helpers, used by the integration tests and the report.

    pub fn current_foreground(&self) -> &BTreeSet<i32> {
        &self.current_foreground
    }

    pub fn pending_remaining(&self, uid: i32) -> Option<i32> {
        self.pending.get(&uid).copied()
    }

    pub fn timeline(&self) -> &WakeupTimeline {
        &self.timeline
    }

    pub fn registry(&self) -> &AppRegistry {
        &self.registry
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Render a second count the way a human reads uptime: `1h02m03s`,
/// `4m05s`, `12s`.
pub fn fmt_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
