//! Hot-reload scenarios: watched document changes, rollback on a rejected
//! document, and dynamic composite namespaces.

use std::net::TcpStream;

use flowgate::{BindingDoc, BindingKind, NamespaceDoc};
use serial_test::serial;

use crate::commons::{
    assert_echo, connect, echo_document, free_port, spawn_gateway, start_gateway, wait_for_echo,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_watched_port_change_drains_existing_connection() {
    let port_a = free_port();
    let port_b = free_port();
    let gateway = spawn_gateway(&echo_document(port_a, None)).await;

    let mut settled = connect(port_a);
    assert_echo(&mut settled, b"before reload");

    gateway.rewrite(&echo_document(port_b, None)).await;
    let mut moved = wait_for_echo(port_b, b"after reload");
    assert_echo(&mut moved, b"new listener");

    // The pre-reload connection keeps flowing while it drains.
    assert_echo(&mut settled, b"still alive");
    // The old listener is gone.
    assert!(TcpStream::connect(("127.0.0.1", port_a)).is_err());

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_rejected_reload_keeps_previous_configuration() {
    let port_a = free_port();
    let gateway = start_gateway(&echo_document(port_a, None)).await;
    let manager = gateway.engine.manager();

    // Occupy the target port so the replacement listener cannot bind.
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").expect("blocker");
    let taken = blocker.local_addr().expect("addr").port();

    let before = manager.active();
    assert!(manager
        .apply("gateway.json", &echo_document(taken, None))
        .await
        .is_err());

    // Rollback restored the old namespaces and the old listener.
    let after = manager.active();
    assert_eq!(after.namespaces.len(), before.namespaces.len());
    assert_eq!(after.namespaces[0].name, "edge");
    let mut stream = wait_for_echo(port_a, b"rollback");
    assert_echo(&mut stream, b"intact");

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_composite_attach_and_detach() {
    let port = free_port();
    let gateway = start_gateway(&echo_document(port, None)).await;
    let manager = gateway.engine.manager();

    let parent = manager.active().namespaces[0]
        .binding("south")
        .expect("south")
        .id;
    let overlay = NamespaceDoc {
        name: "edge.overlay".to_string(),
        bindings: vec![BindingDoc {
            name: "mirror".to_string(),
            type_name: "echo".to_string(),
            kind: BindingKind::Duplex,
            options: serde_json::Value::Null,
            routes: Vec::new(),
            exit: None,
        }],
        guards: Vec::new(),
        vaults: Vec::new(),
        catalogs: Vec::new(),
        telemetry: Default::default(),
    };

    manager
        .attach_composite(overlay, parent)
        .await
        .expect("attach");
    let active = manager.active();
    assert_eq!(active.namespaces.len(), 2);
    let attached = active
        .namespaces
        .iter()
        .find(|ns| ns.name == "edge.overlay")
        .expect("overlay present");
    assert!(attached.is_composite());
    assert_eq!(attached.composite_of, Some(parent));

    manager.detach_composite("edge.overlay").await.expect("detach");
    assert_eq!(manager.active().namespaces.len(), 1);

    // The static data path is unaffected by attach/detach churn.
    let mut stream = connect(port);
    assert_echo(&mut stream, b"still routing");

    gateway.stop().await;
}
