use tokio::sync::watch;

use crate::config::GatewaySettings;

use super::EngineBuilder;

fn test_settings() -> GatewaySettings {
    let mut settings = GatewaySettings::default();
    settings.runtime.worker_count = 1;
    settings.monitoring.prometheus_enabled = false;
    settings
}

#[tokio::test]
async fn test_ready_fails_without_build() {
    let (_tx, rx) = watch::channel(());
    assert!(EngineBuilder::init(test_settings(), rx).ready().is_err());
}

#[tokio::test]
async fn test_built_engine_is_not_ready_until_started() {
    let (_tx, rx) = watch::channel(());
    let engine = EngineBuilder::init(test_settings(), rx)
        .build()
        .ready()
        .expect("engine");
    assert!(!engine.is_ready());
    assert!(engine.manager().active().namespaces.is_empty());
    engine.close().await.expect("close");
}

#[tokio::test]
async fn test_start_applies_initial_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("gateway.json");
    tokio::fs::write(
        &path,
        r#"{ "namespaces": [ { "name": "edge", "bindings": [
            { "name": "mirror", "type": "echo", "kind": "duplex" } ] } ] }"#,
    )
    .await
    .expect("seed");

    let mut settings = test_settings();
    settings.watch.source = path.to_str().expect("utf8 path").to_string();

    let (_tx, rx) = watch::channel(());
    let engine = EngineBuilder::init(settings, rx)
        .build()
        .ready()
        .expect("engine");

    engine.start().await.expect("start");
    assert!(engine.is_ready());
    let active = engine.manager().active();
    assert_eq!(active.namespaces.len(), 1);
    assert_eq!(active.namespaces[0].name, "edge");

    engine.close().await.expect("close");
    assert!(!engine.is_ready());
}

#[tokio::test]
async fn test_start_rejects_bad_initial_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("gateway.json");
    tokio::fs::write(&path, r#"{ "namespaces": [ { "name": "edge", "bindings": [
        { "name": "x", "type": "warp-drive", "kind": "server" } ] } ] }"#)
        .await
        .expect("seed");

    let mut settings = test_settings();
    settings.watch.source = path.to_str().expect("utf8 path").to_string();

    let (_tx, rx) = watch::channel(());
    let engine = EngineBuilder::init(settings, rx)
        .build()
        .ready()
        .expect("engine");

    assert!(engine.start().await.is_err());
    assert!(!engine.is_ready());
    engine.close().await.expect("close");
}
