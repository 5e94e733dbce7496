use anyhow::Context;
use crossbeam_channel::unbounded;
use frostd::doze::ShellDoze;
use frostd::scheduler::Scheduler;
use frostd::system::{BatteryMonitor, SystemInfo};
use frostd::watcher::{self, Touch};
use frostd::{
    create_source, select_work_mode, AppRegistry, CgroupPaths, Freezer, HookClient, LogCollector,
    ProcScanner, Settings,
};
use std::path::PathBuf;

const DEFAULT_DAEMON_DIR: &str = "/data/adb/frostd";

fn daemon_dir() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--dir" {
            if let Some(dir) = args.next() {
                return PathBuf::from(dir);
            }
        }
    }
    PathBuf::from(DEFAULT_DAEMON_DIR)
}

fn main() -> anyhow::Result<()> {
    let dir = daemon_dir();

    // =========================================================================
    // SETTINGS, THEN LOGGING - THE LOG FILE PATH LIVES IN THE SETTINGS
    // =========================================================================
    let settings = Settings::load(&dir.join("settings.toml"))
        .with_context(|| format!("loading settings from {}", dir.display()))?;

    let collector = LogCollector::new(settings.log_file.clone())
        .map_err(|e| anyhow::anyhow!(e))
        .context("initializing log collector")?;
    let max_level = if settings.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    log::set_boxed_logger(Box::new(collector.clone()))
        .map(|()| log::set_max_level(max_level))
        .map_err(|e| anyhow::anyhow!("installing logger: {}", e))?;

    log::info!("[Main] frostd {} starting from {}", frostd::VERSION, dir.display());

    // =========================================================================
    // DEVICE FACTS AND MANAGED-APP REGISTRY
    // =========================================================================
    let info = SystemInfo::detect();
    info.log_startup();

    let registry = match AppRegistry::load_from_file(&dir.join("apps.json")) {
        Ok(registry) => {
            log::info!("[Main] {} managed apps loaded", registry.len());
            registry
        }
        Err(e) => {
            log::warn!("[Main] No usable app registry ({}), managing nothing yet", e);
            AppRegistry::new()
        }
    };

    // =========================================================================
    // BACKEND SELECTION
    // =========================================================================
    let paths = CgroupPaths::default();
    let work_mode = select_work_mode(settings.work_mode, &paths);
    log::info!("[Main] Work mode: {}", work_mode);

    let scanner = ProcScanner::default();
    let hook = HookClient::new(settings.hook_socket.clone());
    let freezer = Freezer::new(work_mode, paths, scanner.clone(), hook.clone());

    // =========================================================================
    // WATCHER POOL
    // =========================================================================
    let (touch_tx, touch_rx) = unbounded::<Touch>();
    watcher::spawn_cpuset_watcher(touch_tx.clone(), info.sdk_int);
    for n in &settings.input_events {
        watcher::spawn_input_watcher(touch_tx.clone(), *n);
    }

    // =========================================================================
    // SCHEDULER - RUNS ON THIS THREAD, FOREVER
    // =========================================================================
    let source = create_source(settings.foreground_source, info.sdk_int, hook.clone());
    log::info!("[Main] Foreground source: {}", source.name());
    let battery = settings.battery_check.then(BatteryMonitor::new);

    let scheduler = Scheduler::new(
        settings,
        registry,
        freezer,
        scanner,
        source,
        Box::new(ShellDoze::new()),
        hook,
        touch_rx,
        battery,
    );
    scheduler.run()
}
