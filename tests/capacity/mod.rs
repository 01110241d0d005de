//! Per-worker stream capacity: opens beyond the limit are rejected at
//! accept time, and the slot is reusable once a pair retires.

use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use serial_test::serial;

use crate::commons::{assert_echo, connect, echo_document, free_port, start_gateway_with, wait_for_echo};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_capacity_rejects_then_recovers() {
    let port = free_port();
    let gateway = start_gateway_with(&echo_document(port, None), |settings| {
        settings.runtime.worker_count = 1;
        settings.runtime.max_streams_per_worker = 2;
    })
    .await;

    let mut first = connect(port);
    let mut second = connect(port);
    assert_echo(&mut first, b"one");
    assert_echo(&mut second, b"two");

    // Third open exceeds the worker's capacity; the socket is dropped
    // without any echo traffic.
    let mut third = connect(port);
    let _ = third.write_all(b"three");
    let mut buf = Vec::new();
    match third.read_to_end(&mut buf) {
        Ok(n) => assert_eq!(n, 0),
        Err(_) => {} // reset by peer is equally acceptable
    }

    // Retiring one pair frees the slot.
    drop(first);
    let mut fourth = wait_for_echo(port, b"four");
    assert_echo(&mut fourth, b"four again");

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_rejected_connection_leaves_listener_up() {
    let port = free_port();
    let gateway = start_gateway_with(&echo_document(port, None), |settings| {
        settings.runtime.worker_count = 1;
        settings.runtime.max_streams_per_worker = 1;
    })
    .await;

    let mut only = connect(port);
    assert_echo(&mut only, b"occupied");

    for _ in 0..3 {
        let mut extra = connect(port);
        let mut buf = Vec::new();
        let _ = extra.read_to_end(&mut buf);
        assert!(buf.is_empty());
        std::thread::sleep(Duration::from_millis(50));
    }

    // The occupant is unaffected and the listener still accepts.
    assert_echo(&mut only, b"still occupied");
    assert!(TcpStream::connect(("127.0.0.1", port)).is_ok());

    gateway.stop().await;
}
