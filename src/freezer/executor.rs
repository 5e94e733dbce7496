//! The freeze executor: drives one app in or out of its quiesced state.
//!
//! The action taken is the product of the app's policy (`FreezeMode`) and
//! the backend selected at startup (`WorkMode`). Per-pid failures are
//! logged and skipped; a batch never aborts halfway.

use crate::freezer::{write_pid, write_str, CgroupPaths};
use crate::hook::{HookClient, REPLY_SUCCESS};
use crate::models::{FreezeMode, ManagedApp, WorkMode};
use crate::procfs::ProcScanner;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::thread::sleep;
use std::time::Duration;

/// Pause between SIGSTOP and the first SIGKILL of a kill sequence.
const KILL_STOP_PAUSE: Duration = Duration::from_millis(50);
/// Some apps respawn killed pids; kill again after this pause.
const KILL_RESPAWN_PAUSE: Duration = Duration::from_secs(5);

/// Outcome of one executor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apply {
    /// Backend actions were issued for this many pids.
    Handled(usize),
    /// A binder transaction was still in flight for this pid; the caller
    /// should retry later with backoff.
    BinderBusy(i32),
}

pub struct Freezer {
    work_mode: WorkMode,
    paths: CgroupPaths,
    scanner: ProcScanner,
    hook: HookClient,
}

impl Freezer {
    pub fn new(
        work_mode: WorkMode,
        paths: CgroupPaths,
        scanner: ProcScanner,
        hook: HookClient,
    ) -> Self {
        Freezer {
            work_mode,
            paths,
            scanner,
            hook,
        }
    }

    pub fn work_mode(&self) -> WorkMode {
        self.work_mode
    }

    /// Freeze (`freeze = true`) or thaw one app.
    ///
    /// Before a freeze the pid list is refreshed from procfs; before a thaw
    /// pids whose `/proc/<pid>` has vanished are dropped. Returns how many
    /// pids the backend acted on, or `BinderBusy` when the freeze must be
    /// deferred.
    pub fn apply(&self, app: &mut ManagedApp, freeze: bool) -> Apply {
        if freeze {
            app.pids = self.scanner.pids_for(app.uid, &app.package);
        } else {
            let scanner = &self.scanner;
            app.pids.retain(|&pid| scanner.pid_alive(pid));
        }

        match app.freeze_mode {
            FreezeMode::Freezer | FreezeMode::FreezerBreak
                if self.work_mode != WorkMode::GlobalSigstop =>
            {
                if freeze && app.is_tolerant {
                    // Binder-level freezing is not wired up; rather than
                    // freeze a tolerant app mid-transaction, report busy so
                    // the scheduler retries with backoff.
                    return Apply::BinderBusy(app.pids.first().copied().unwrap_or(0));
                }
                self.drive_cgroup(app, freeze);
                app.is_frozen = freeze;
            }

            // Under GLOBAL_SIGSTOP the freezer policies degrade to signals.
            FreezeMode::Freezer
            | FreezeMode::FreezerBreak
            | FreezeMode::Signal
            | FreezeMode::SignalBreak => {
                if freeze && app.is_tolerant {
                    return Apply::BinderBusy(app.pids.first().copied().unwrap_or(0));
                }
                self.signal_all(
                    app,
                    if freeze {
                        Signal::SIGSTOP
                    } else {
                        Signal::SIGCONT
                    },
                );
                app.is_frozen = freeze;
            }

            FreezeMode::Terminate => {
                if freeze {
                    self.kill_sequence(app);
                }
                return Apply::Handled(0);
            }

            FreezeMode::Whitelist | FreezeMode::Whiteforce => {
                log::warn!("[Freezer] {} is whitelisted, nothing to apply", app.label);
                return Apply::Handled(0);
            }
        }

        if freeze && app.needs_break_network() {
            match self.hook.break_network(app.uid) {
                Ok(REPLY_SUCCESS) => log::info!("[Freezer] Network revoked for {}", app.label),
                Ok(status) => log::warn!(
                    "[Freezer] Network break for {} answered {}",
                    app.label,
                    status
                ),
                Err(e) => log::warn!("[Freezer] Network break for {} failed: {}", app.label, e),
            }
        }

        Apply::Handled(app.pids.len())
    }

    /// Apply the cgroup backend to every pid of the app.
    fn drive_cgroup(&self, app: &ManagedApp, freeze: bool) {
        let verb = if freeze { "Freeze" } else { "Thaw" };

        match self.work_mode {
            WorkMode::V2Frozen => {
                let path = if freeze {
                    self.paths.v2_frozen_procs()
                } else {
                    self.paths.v2_unfrozen_procs()
                };
                for &pid in &app.pids {
                    if let Err(e) = write_pid(&path, pid) {
                        log::warn!(
                            "[Freezer] {} [{} PID:{}] failed (V2FROZEN): {}",
                            verb,
                            app.label,
                            pid,
                            e
                        );
                    }
                }
            }

            WorkMode::V2Uid => {
                let value = if freeze { "1" } else { "0" };
                for &pid in &app.pids {
                    let path = self.paths.v2_uid_pid_freeze(app.uid, pid);
                    if let Err(e) = write_str(&path, value) {
                        log::warn!(
                            "[Freezer] {} [{} PID:{}] failed (V2UID, pid node gone or not yet created): {}",
                            verb,
                            app.label,
                            pid,
                            e
                        );
                    }
                }
            }

            WorkMode::V1St => {
                // Freeze writes the cgroup first, then stops; thaw must
                // continue first or the unfrozen write cannot take effect.
                if freeze {
                    for &pid in &app.pids {
                        if let Err(e) = write_pid(&self.paths.v1_frozen_procs(), pid) {
                            log::warn!(
                                "[Freezer] Freeze [{} PID:{}] failed (V1_ST cgroup): {}",
                                app.label,
                                pid,
                                e
                            );
                        }
                        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGSTOP) {
                            log::warn!(
                                "[Freezer] Freeze [{} PID:{}] failed (V1_ST signal): {}",
                                app.label,
                                pid,
                                e
                            );
                        }
                    }
                } else {
                    for &pid in &app.pids {
                        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGCONT) {
                            log::warn!(
                                "[Freezer] Thaw [{} PID:{}] failed (V1_ST signal): {}",
                                app.label,
                                pid,
                                e
                            );
                        }
                        if let Err(e) = write_pid(&self.paths.v1_unfrozen_procs(), pid) {
                            log::warn!(
                                "[Freezer] Thaw [{} PID:{}] failed (V1_ST cgroup): {}",
                                app.label,
                                pid,
                                e
                            );
                        }
                    }
                }
            }

            WorkMode::V1 => {
                let path = if freeze {
                    self.paths.v1_frozen_procs()
                } else {
                    self.paths.v1_unfrozen_procs()
                };
                for &pid in &app.pids {
                    if let Err(e) = write_pid(&path, pid) {
                        log::warn!(
                            "[Freezer] {} [{} PID:{}] failed (V1): {}",
                            verb,
                            app.label,
                            pid,
                            e
                        );
                    }
                }
            }

            WorkMode::GlobalSigstop => {
                log::error!("[Freezer] {} reached the cgroup path in SIGSTOP mode", app.label);
            }
        }
    }

    /// Signal every pid of the app; only SIGSTOP failures are worth a line.
    fn signal_all(&self, app: &ManagedApp, signal: Signal) {
        for &pid in &app.pids {
            if let Err(e) = kill(Pid::from_raw(pid), signal) {
                if signal == Signal::SIGSTOP {
                    log::warn!(
                        "[Freezer] SIGSTOP freeze [{} PID:{}] failed: {}",
                        app.label,
                        pid,
                        e
                    );
                }
            }
        }
    }

    /// TERMINATE: stop, kill, wait out a respawn, kill again.
    fn kill_sequence(&self, app: &mut ManagedApp) {
        // A task sitting frozen in a v1 cgroup cannot take SIGKILL.
        if self.work_mode.is_v1() && app.is_frozen {
            self.drive_cgroup(app, false);
            app.is_frozen = false;
        }

        for &pid in &app.pids {
            let _ = kill(Pid::from_raw(pid), Signal::SIGSTOP);
        }
        sleep(KILL_STOP_PAUSE);

        for &pid in &app.pids {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
        sleep(KILL_RESPAWN_PAUSE);

        for &pid in &app.pids {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
}
