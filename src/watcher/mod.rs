//! Event watcher pool: cheap "the user may be interacting" pulses.
//!
//! Each watcher parks a thread in a blocking inotify read on one node,
//! either the cpuset top-app file (rewritten whenever a task moves to the
//! top cpuset) or an input event device. It sends a unit touch on the
//! shared channel whenever anything happens, then sleeps half a second so
//! a burst of events costs one message.
//!
//! A watcher that cannot be set up is fatal: the daemon is blind without
//! its triggers, so the process exits and the module supervisor restarts
//! it. A read failure later only ends that one thread.

use crossbeam_channel::Sender;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Unit interaction event.
#[derive(Debug, Clone, Copy)]
pub struct Touch;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watch the cpuset top-app node. Android 13 renamed the file.
pub fn spawn_cpuset_watcher(tx: Sender<Touch>, sdk_int: i32) -> JoinHandle<()> {
    let path = cpuset_event_path(sdk_int);
    thread::spawn(move || {
        // Give init a moment to finish populating cpuset on boot.
        thread::sleep(Duration::from_secs(1));
        watch_loop(&path, "cpuset", &tx);
    })
}

pub fn cpuset_event_path(sdk_int: i32) -> PathBuf {
    if sdk_int >= 33 {
        PathBuf::from("/dev/cpuset/top-app/cgroup.procs")
    } else {
        PathBuf::from("/dev/cpuset/top-app/tasks")
    }
}

/// Watch one `/dev/input/event<N>` node.
pub fn spawn_input_watcher(tx: Sender<Touch>, n: u32) -> JoinHandle<()> {
    let path = PathBuf::from(format!("/dev/input/event{}", n));
    thread::spawn(move || {
        // Stagger the input watchers so they do not all init at once.
        thread::sleep(Duration::from_millis(10 * n as u64));
        watch_loop(&path, "input", &tx);
    })
}

/// Watch an arbitrary node; used directly by tests.
pub fn spawn_path_watcher(tx: Sender<Touch>, path: PathBuf, tag: &'static str) -> JoinHandle<()> {
    thread::spawn(move || watch_loop(&path, tag, &tx))
}

fn watch_loop(path: &Path, tag: &str, tx: &Sender<Touch>) {
    let inotify = match Inotify::init(InitFlags::empty()) {
        Ok(inotify) => inotify,
        Err(e) => {
            // Without its triggers the daemon is blind; die and let the
            // module supervisor restart it.
            eprintln!("[Watcher] inotify init for {} failed: {}", tag, e);
            log::error!("[Watcher] inotify init for {} failed: {}", tag, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = inotify.add_watch(path, AddWatchFlags::IN_ALL_EVENTS) {
        eprintln!("[Watcher] Cannot watch {} ({}): {}", path.display(), tag, e);
        log::error!("[Watcher] Cannot watch {} ({}): {}", path.display(), tag, e);
        std::process::exit(1);
    }

    log::info!("[Watcher] Watching {} ({})", path.display(), tag);

    loop {
        match inotify.read_events() {
            Ok(events) => {
                if events.is_empty() {
                    continue;
                }
                if tx.send(Touch).is_err() {
                    break; // scheduler is gone
                }
                thread::sleep(DEBOUNCE);
            }
            Err(e) => {
                log::warn!("[Watcher] Read on {} ({}) failed: {}", path.display(), tag, e);
                break;
            }
        }
    }

    log::info!("[Watcher] Stopped watching {} ({})", path.display(), tag);
}
