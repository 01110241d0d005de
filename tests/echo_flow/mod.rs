//! End-to-end data-path scenarios: a tcp server binding routed into an echo
//! binding, exercised over real sockets.

use std::io::Read;
use std::io::Write;
use std::net::Shutdown;

use serial_test::serial;

use crate::commons::{assert_echo, connect, echo_document, free_port, start_gateway};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_loopback_echo_round_trip() {
    let port = free_port();
    let gateway = start_gateway(&echo_document(port, None)).await;

    let mut stream = connect(port);
    let payload = b"hello across the gateway";
    stream.write_all(payload).expect("write");
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).expect("read echo");
    assert_eq!(&echoed, payload);

    // Half-close propagates as a clean end of stream, not an abort.
    stream.shutdown(Shutdown::Write).expect("half close");
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).expect("drain");
    assert!(rest.is_empty());

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_sequential_round_trips_share_one_stream() {
    let port = free_port();
    let gateway = start_gateway(&echo_document(port, None)).await;

    let mut stream = connect(port);
    for i in 0..5u8 {
        let payload = vec![b'a' + i; 64];
        assert_echo(&mut stream, &payload);
    }

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_payload_larger_than_window_is_echoed_in_full() {
    let port = free_port();
    // A 6-byte window forces the data path through many credit grants.
    let gateway = start_gateway(&echo_document(port, Some(6))).await;

    let mut stream = connect(port);
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    stream.write_all(&payload).expect("write");
    stream.shutdown(Shutdown::Write).expect("half close");

    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).expect("drain");
    assert_eq!(echoed, payload);

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_concurrent_connections_get_independent_echoes() {
    let port = free_port();
    let gateway = start_gateway(&echo_document(port, None)).await;

    let mut first = connect(port);
    let mut second = connect(port);
    assert_echo(&mut first, b"first lane");
    assert_echo(&mut second, b"second lane");
    assert_echo(&mut first, b"first again");

    gateway.stop().await;
}
