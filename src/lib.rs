//! frostd: background-app freezer daemon for rooted Android devices
//!
//! This crate watches which user-installed apps are visible, counts the
//! rest down in a pending queue, and drives them into a quiesced state
//! through whichever kernel freezing mechanism the device supports. Frozen
//! apps are revived when they return to the foreground, on a periodic
//! wakeup window, and escapees are caught by a procfs audit and re-frozen.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Core data structures (freeze policies, backends, registry)
//! - **config**: Settings file handling
//! - **log_collector**: Channel-fed, size-capped file logger
//! - **system**: Android property probe and battery chore
//! - **procfs**: Process discovery and wchan classification
//! - **freezer**: Backend probe/mount/selection and the freeze executor
//! - **foreground**: The three foreground-set providers
//! - **hook**: Local-socket RPC to the companion in-process hook
//! - **doze**: Device-idle supervision seam
//! - **watcher**: Inotify watcher pool feeding interaction pulses
//! - **scheduler**: The 500 ms orchestrator loop and wakeup timeline

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod log_collector;
pub mod system;

pub mod procfs;

pub mod freezer;

pub mod foreground;
pub mod hook;

pub mod doze;
pub mod watcher;

pub mod scheduler;

// Re-export the log crate for macro usage
pub use log;

// Re-export error types for easy access
pub use error::{BackendError, ConfigError, Result, RpcError, SourceError};

// Re-export model types for easy access
pub use models::{AppRegistry, FreezeMode, ManagedApp, WorkMode};

pub use config::{ConfiguredMode, Settings, SourceChoice, WAKEUP_DISABLED_MIN};

pub use log_collector::LogCollector;

pub use freezer::{select_work_mode, Apply, CgroupPaths, Freezer};

pub use foreground::{create_source, ForegroundSource};

pub use hook::{HookClient, WakeupLockMode};

pub use procfs::ProcScanner;

pub use scheduler::{Scheduler, WakeupTimeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
