//! Local-socket foreground source.
//!
//! Asks the companion hook for the visible uid set. By far the cheapest
//! provider (no subprocess, no text parsing), but only works when the hook
//! is loaded into the system server.

use crate::error::SourceError;
use crate::foreground::ForegroundSource;
use crate::hook::HookClient;
use crate::models::AppRegistry;
use std::collections::BTreeSet;

pub struct LocalSocketSource {
    hook: HookClient,
}

impl LocalSocketSource {
    pub fn new(hook: HookClient) -> Self {
        LocalSocketSource { hook }
    }
}

impl ForegroundSource for LocalSocketSource {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn poll(
        &mut self,
        registry: &mut AppRegistry,
        _last: &BTreeSet<i32>,
    ) -> Result<BTreeSet<i32>, SourceError> {
        let uids = self.hook.get_foreground()?;

        let mut cur = BTreeSet::new();
        for uid in uids {
            match registry.get(uid) {
                Some(app) if !app.is_whitelist() => {
                    cur.insert(uid);
                }
                Some(_) => {}
                None => log::info!(
                    "[Foreground] Hook reported unmanaged uid {}; app list may be stale",
                    uid
                ),
            }
        }
        Ok(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FreezeMode, ManagedApp};
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    /// Serve exactly one canned reply on a temp socket.
    fn one_shot_server(reply_words: Vec<i32>) -> std::path::PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hook.sock");
        let listener = UnixListener::bind(&path).unwrap();
        std::thread::spawn(move || {
            let _dir = dir; // keep the socket path alive until served
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = Vec::new();
                let _ = stream.read_to_end(&mut request);
                let mut raw = Vec::new();
                for word in reply_words {
                    raw.extend_from_slice(&word.to_le_bytes());
                }
                let _ = stream.write_all(&raw);
            }
        });
        path
    }

    #[test]
    fn test_socket_source_filters_unknown_and_whitelisted() {
        let path = one_shot_server(vec![3, 10077, 10088, 10999]);
        let mut source = LocalSocketSource::new(HookClient::new(&path));

        let mut registry = AppRegistry::new();
        registry.insert(ManagedApp::new(10077, "com.example.app", FreezeMode::Freezer));
        registry.insert(ManagedApp::new(10088, "com.white.app", FreezeMode::Whitelist));

        let cur = source.poll(&mut registry, &BTreeSet::new()).unwrap();
        assert_eq!(cur.into_iter().collect::<Vec<_>>(), vec![10077]);
    }

    #[test]
    fn test_socket_source_rejects_bad_length_header() {
        // Header claims 5 uids but only 1 follows.
        let path = one_shot_server(vec![5, 10077]);
        let mut source = LocalSocketSource::new(HookClient::new(&path));
        let mut registry = AppRegistry::new();

        assert!(source.poll(&mut registry, &BTreeSet::new()).is_err());
    }
}
