//! Foreground sources: who is on screen right now.
//!
//! Three interchangeable providers answer that question: the activity-stack
//! shell dump, the activity-LRU shell dump, and the companion hook over its
//! local socket. The hook is the cheapest when installed; the shell dumps
//! are the fallbacks. Every provider filters out unknown and whitelisted
//! uids before the set reaches the scheduler.

pub mod lru;
pub mod socket;
pub mod stack;

pub use lru::LruSource;
pub use socket::LocalSocketSource;
pub use stack::ActivityStackSource;

use crate::config::SourceChoice;
use crate::error::SourceError;
use crate::hook::HookClient;
use crate::models::AppRegistry;
use std::collections::BTreeSet;
use std::io::Read;
use std::process::{Command, Stdio};

/// Upper bound on a captured shell dump; anything longer is truncated and
/// the truncation logged.
pub(crate) const DUMP_BUF_CAP: usize = 256 * 1024;

/// One provider of the currently visible uid set.
pub trait ForegroundSource: Send {
    fn name(&self) -> &'static str;

    /// Produce the current foreground set. `last` is the previous set, used
    /// by providers that sanity-check against sudden jumps.
    fn poll(
        &mut self,
        registry: &mut AppRegistry,
        last: &BTreeSet<i32>,
    ) -> Result<BTreeSet<i32>, SourceError>;
}

/// Pick a provider. `Auto` probes the hook socket once and falls back to
/// the shell dumps when the hook is not answering.
pub fn create_source(
    choice: SourceChoice,
    sdk_int: i32,
    hook: HookClient,
) -> Box<dyn ForegroundSource> {
    match choice {
        SourceChoice::Socket => Box::new(LocalSocketSource::new(hook)),
        SourceChoice::ActivityStack => Box::new(ActivityStackSource::new()),
        SourceChoice::Lru => Box::new(LruSource::new(sdk_int)),
        SourceChoice::Auto => {
            if hook.get_foreground().is_ok() {
                log::info!("[Foreground] Companion hook answering, using socket source");
                Box::new(LocalSocketSource::new(hook))
            } else if sdk_int >= 29 {
                log::info!("[Foreground] Hook not answering, using activity-LRU source");
                Box::new(LruSource::new(sdk_int))
            } else {
                log::info!("[Foreground] Hook not answering, using activity-stack source");
                Box::new(ActivityStackSource::new())
            }
        }
    }
}

/// Spawn a shell dump with stdout piped, stderr and stdin detached, and
/// read at most `DUMP_BUF_CAP` bytes of its output.
pub(crate) fn run_capture(program: &str, args: &[&str]) -> Result<String, SourceError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| SourceError::SpawnFailed {
            cmd: program.to_string(),
            reason: e.to_string(),
        })?;

    let mut out = Vec::with_capacity(8 * 1024);
    if let Some(stdout) = child.stdout.take() {
        let mut limited = stdout.take(DUMP_BUF_CAP as u64);
        limited.read_to_end(&mut out)?;
    }
    if out.len() >= DUMP_BUF_CAP {
        log::warn!(
            "[Foreground] {} output truncated at {} bytes",
            program,
            DUMP_BUF_CAP
        );
        let _ = child.kill();
    }
    let _ = child.wait();

    Ok(String::from_utf8_lossy(&out).into_owned())
}
