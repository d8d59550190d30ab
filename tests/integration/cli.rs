//! The `netpipe` binary reading its own stdin

use crate::harness::HttpSink;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_stdin_fully_delivered_with_small_buffer_and_open_input() {
    let sink = HttpSink::start();
    let mut child = Command::new(env!("CARGO_BIN_EXE_netpipe"))
        .args(["-d", &sink.url("/upload")])
        .args(["-s", "1k", "-r", "0", "-i", "1", "-l", "0", "-L", "100"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let payload: Vec<u8> = (0..3000u32).map(|i| b'a' + (i % 26) as u8).collect();
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(&payload).unwrap();
    stdin.flush().unwrap();

    // input stays open: every byte must still arrive
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut delivered = Vec::new();
    while Instant::now() < deadline {
        delivered = sink
            .acknowledged()
            .into_iter()
            .flat_map(|r| r.body)
            .collect();
        if delivered.len() >= payload.len() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    child.kill().unwrap();
    child.wait().unwrap();
    drop(stdin);
    assert_eq!(delivered.len(), payload.len());
    assert_eq!(delivered, payload);
}
