//! Robust, decoupled logging pipeline for the daemon.
//!
//! All log lines flow through one unbounded crossbeam channel into a single
//! background writer thread, so the scheduler never blocks on disk and log
//! calls cannot fail. The log file is size-capped: when an append would push
//! it past the cap the file is truncated and restarted, which keeps the
//! daemon's footprint on `/sdcard` bounded over months of uptime.
//!
//! ```text
//! log::info!() / log::warn!()
//!     |
//! [LogCollector]  (log::Log impl, non-blocking send)
//!     | (crossbeam unbounded channel)
//!     v
//! [writer thread] -- timestamped lines --> log file (capped at 128 KiB)
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Cap on the log file size; exceeding it truncates and restarts the file.
const LOG_FILE_CAP: u64 = 128 * 1024;

enum LogMessage {
    /// Regular log line, already formatted.
    Line(String),
    /// Flush marker with a channel sender to signal completion.
    Flush(std::sync::mpsc::Sender<()>),
}

/// Unified logger that stamps, buffers and persists log lines.
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_path: PathBuf,
}

impl LogCollector {
    /// Create the collector and spawn its writer thread.
    ///
    /// The writer opens the file lazily per line batch so that a deleted or
    /// rotated file does not kill logging for the rest of the daemon's life.
    pub fn new(log_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create log directory: {}", e))?;
            }
        }

        let (tx, rx) = unbounded::<LogMessage>();
        let path = log_path.clone();

        // Blocking recv() on a dedicated OS thread; safe from any caller.
        std::thread::spawn(move || {
            let mut file: Option<File> = None;
            let mut size: u64 = 0;

            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        if file.is_none() {
                            match OpenOptions::new().create(true).append(true).open(&path) {
                                Ok(f) => {
                                    size = f.metadata().map(|m| m.len()).unwrap_or(0);
                                    file = Some(f);
                                }
                                Err(e) => {
                                    eprintln!("[Log] Cannot open {}: {}", path.display(), e);
                                    continue;
                                }
                            }
                        }

                        if size + line.len() as u64 >= LOG_FILE_CAP {
                            // Restart the file instead of growing without bound.
                            file = File::create(&path).ok();
                            size = 0;
                            if file.is_none() {
                                eprintln!("[Log] Cannot restart {}", path.display());
                                continue;
                            }
                        }

                        if let Some(f) = file.as_mut() {
                            if f.write_all(line.as_bytes()).is_ok() {
                                size += line.len() as u64;
                                let _ = f.flush();
                            } else {
                                // Force a reopen on the next line.
                                file = None;
                            }
                        }
                    }
                    LogMessage::Flush(done) => {
                        if let Some(f) = file.as_mut() {
                            let _ = f.flush();
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector { tx, log_path })
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    /// Send a line (non-blocking, cannot fail).
    pub fn log_str(&self, message: impl AsRef<str>) {
        let line = format!(
            "[{}] {}\n",
            Local::now().format("%H:%M:%S"),
            message.as_ref()
        );
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Block until every line sent before this call is durably on disk.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        done_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))?;
        Ok(())
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            tx: self.tx.clone(),
            log_path: self.log_path.clone(),
        }
    }
}

/// Wires all log::info!(), log::warn!(), log::error!() calls into the
/// collector; register with `log::set_boxed_logger`.
impl Log for LogCollector {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.log_str(format!("[{}] {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}
