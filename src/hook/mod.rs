//! Local-socket RPC client to the companion in-process hook.
//!
//! The hook lives inside the system server and answers three requests:
//! the current foreground uid set, wakeup-lock policy switches for a uid
//! list, and per-uid network revocation. Frames are little-endian i32
//! arrays: `[command, payload_bytes, payload...]` out, a bare i32 array
//! back. A malformed reply is hex-dumped to the log and abandoned; it never
//! takes the daemon down.

use crate::error::RpcError;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

pub const CMD_GET_FOREGROUND: i32 = 1;
pub const CMD_SET_WAKEUP_LOCK: i32 = 2;
pub const CMD_BREAK_NETWORK: i32 = 3;

pub const REPLY_FAILURE: i32 = 0;
pub const REPLY_SUCCESS: i32 = 1;

/// The largest sensible reply: a uid-list header plus 63 uids.
const MAX_REPLY_WORDS: usize = 64;

const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Wakeup-lock handling requested from the hook while dozing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupLockMode {
    /// Drop wakeup locks held by the given uids.
    Ignore = 0,
    /// Restore normal wakeup-lock behaviour.
    Default = 1,
}

/// Cheap handle to the hook socket; a fresh connection per request.
#[derive(Debug, Clone)]
pub struct HookClient {
    socket_path: PathBuf,
}

impl HookClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        HookClient {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// `GET_FOREGROUND`: uids the hook currently considers visible.
    pub fn get_foreground(&self) -> Result<Vec<i32>, RpcError> {
        let words = self.request(CMD_GET_FOREGROUND, &[])?;
        if words.is_empty() {
            return Err(self.malformed("empty reply", &words));
        }
        let count = words[0];
        if count < 0 || count > 16 || count as usize != words.len() - 1 {
            return Err(self.malformed(
                &format!("uid count {} vs {} words", count, words.len()),
                &words,
            ));
        }
        Ok(words[1..].to_vec())
    }

    /// `SET_WAKEUP_LOCK`: apply `mode` to `uids`, returning the hook status.
    pub fn set_wakeup_lock(&self, mode: WakeupLockMode, uids: &[i32]) -> Result<i32, RpcError> {
        let mut payload = Vec::with_capacity(uids.len() + 2);
        payload.push(uids.len() as i32);
        payload.push(mode as i32);
        payload.extend_from_slice(uids);

        let words = self.request(CMD_SET_WAKEUP_LOCK, &payload)?;
        if words.len() != 1 {
            return Err(self.malformed(&format!("{} status words", words.len()), &words));
        }
        Ok(words[0])
    }

    /// `BREAK_NETWORK`: revoke network for one uid.
    pub fn break_network(&self, uid: i32) -> Result<i32, RpcError> {
        let words = self.request(CMD_BREAK_NETWORK, &[uid])?;
        if words.len() != 1 {
            return Err(self.malformed(&format!("{} status words", words.len()), &words));
        }
        Ok(words[0])
    }

    fn request(&self, cmd: i32, payload: &[i32]) -> Result<Vec<i32>, RpcError> {
        let mut stream =
            UnixStream::connect(&self.socket_path).map_err(RpcError::Unreachable)?;
        stream.set_read_timeout(Some(RPC_TIMEOUT))?;
        stream.set_write_timeout(Some(RPC_TIMEOUT))?;

        let mut frame = Vec::with_capacity((payload.len() + 2) * 4);
        frame.extend_from_slice(&cmd.to_le_bytes());
        frame.extend_from_slice(&((payload.len() * 4) as i32).to_le_bytes());
        for word in payload {
            frame.extend_from_slice(&word.to_le_bytes());
        }
        stream.write_all(&frame)?;
        stream.shutdown(std::net::Shutdown::Write)?;

        let mut raw = Vec::with_capacity(256);
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    raw.extend_from_slice(&buf[..n]);
                    if raw.len() > MAX_REPLY_WORDS * 4 {
                        break;
                    }
                }
                Err(e) => return Err(RpcError::IoError(e)),
            }
        }

        if raw.len() % 4 != 0 || raw.len() > MAX_REPLY_WORDS * 4 {
            return Err(RpcError::Malformed {
                reason: format!("{} reply bytes", raw.len()),
                dump: hex_dump(&raw),
            });
        }

        Ok(raw
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn malformed(&self, reason: &str, words: &[i32]) -> RpcError {
        let mut raw = Vec::with_capacity(words.len() * 4);
        for word in words {
            raw.extend_from_slice(&word.to_le_bytes());
        }
        RpcError::Malformed {
            reason: reason.to_string(),
            dump: hex_dump(&raw),
        }
    }
}

/// Render a byte slice as spaced hex pairs for diagnostic dumps.
pub fn hex_dump(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump_formats_pairs() {
        assert_eq!(hex_dump(&[0x00, 0x2A, 0xFF]), "00 2A FF");
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_unreachable_socket_is_an_error() {
        let client = HookClient::new("/nonexistent/frostd_hook");
        assert!(matches!(
            client.get_foreground(),
            Err(RpcError::Unreachable(_))
        ));
    }

    #[test]
    fn test_wakeup_lock_mode_values() {
        assert_eq!(WakeupLockMode::Ignore as i32, 0);
        assert_eq!(WakeupLockMode::Default as i32, 1);
    }
}
