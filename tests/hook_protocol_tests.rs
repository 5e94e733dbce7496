//! Wire-level tests of the hook RPC client against a real Unix socket.

use frostd::hook::{
    HookClient, WakeupLockMode, CMD_BREAK_NETWORK, CMD_GET_FOREGROUND, CMD_SET_WAKEUP_LOCK,
    REPLY_SUCCESS,
};
use frostd::RpcError;
use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::mpsc;

/// One-connection server: records the raw request, answers with the given
/// i32 words (or raw bytes), then hangs up.
fn spawn_server(reply: Vec<u8>) -> (PathBuf, mpsc::Receiver<Vec<u8>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hook.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let (req_tx, req_rx) = mpsc::channel();

    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut request = Vec::new();
            let _ = stream.read_to_end(&mut request);
            let _ = req_tx.send(request);
            let _ = stream.write_all(&reply);
        }
    });

    (path, req_rx, dir)
}

fn words(values: &[i32]) -> Vec<u8> {
    let mut raw = Vec::new();
    for v in values {
        raw.extend_from_slice(&v.to_le_bytes());
    }
    raw
}

fn parse_words(raw: &[u8]) -> Vec<i32> {
    raw.chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[test]
fn get_foreground_round_trip() {
    let (path, req_rx, _dir) = spawn_server(words(&[2, 10077, 10088]));
    let client = HookClient::new(&path);

    let uids = client.get_foreground().unwrap();
    assert_eq!(uids, vec![10077, 10088]);

    let request = parse_words(&req_rx.recv().unwrap());
    assert_eq!(request, vec![CMD_GET_FOREGROUND, 0]);
}

#[test]
fn set_wakeup_lock_frames_header_and_uids() {
    let (path, req_rx, _dir) = spawn_server(words(&[REPLY_SUCCESS]));
    let client = HookClient::new(&path);

    let status = client
        .set_wakeup_lock(WakeupLockMode::Ignore, &[10077, 10088])
        .unwrap();
    assert_eq!(status, REPLY_SUCCESS);

    let request = parse_words(&req_rx.recv().unwrap());
    // command, payload bytes, then [count, mode, uids...]
    assert_eq!(
        request,
        vec![CMD_SET_WAKEUP_LOCK, 16, 2, WakeupLockMode::Ignore as i32, 10077, 10088]
    );
}

#[test]
fn break_network_sends_single_uid() {
    let (path, req_rx, _dir) = spawn_server(words(&[REPLY_SUCCESS]));
    let client = HookClient::new(&path);

    assert_eq!(client.break_network(10077).unwrap(), REPLY_SUCCESS);

    let request = parse_words(&req_rx.recv().unwrap());
    assert_eq!(request, vec![CMD_BREAK_NETWORK, 4, 10077]);
}

#[test]
fn oversized_uid_count_is_malformed() {
    // Header claims 17 uids; the client caps the list at 16.
    let mut reply = vec![17i32];
    reply.extend(std::iter::repeat(10077).take(17));
    let (path, _req_rx, _dir) = spawn_server(words(&reply));
    let client = HookClient::new(&path);

    match client.get_foreground() {
        Err(RpcError::Malformed { dump, .. }) => assert!(!dump.is_empty()),
        other => panic!("expected malformed reply, got {:?}", other),
    }
}

#[test]
fn ragged_reply_is_malformed() {
    let (path, _req_rx, _dir) = spawn_server(vec![0x01, 0x02, 0x03]);
    let client = HookClient::new(&path);

    assert!(matches!(
        client.set_wakeup_lock(WakeupLockMode::Default, &[10077]),
        Err(RpcError::Malformed { .. })
    ));
}

#[test]
fn multi_status_reply_is_malformed() {
    let (path, _req_rx, _dir) = spawn_server(words(&[1, 1]));
    let client = HookClient::new(&path);

    assert!(matches!(
        client.break_network(10077),
        Err(RpcError::Malformed { .. })
    ));
}
