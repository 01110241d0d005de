use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::WatchConfig;
use crate::{Error, WatchError};

use super::{digest, fetch_source, ConfigWatcher};

fn watch_settings(source: &str) -> WatchConfig {
    WatchConfig {
        source: source.to_string(),
        poll_interval_ms: 100,
        jitter_ms: 0,
        request_timeout_ms: 1000,
    }
}

#[test]
fn test_digest_tracks_content() {
    assert_eq!(digest("{}"), digest("{}"));
    assert_ne!(digest("{}"), digest("{ }"));
}

#[tokio::test]
async fn test_fetch_rejects_unsupported_scheme() {
    let err = fetch_source("ftp://example/gateway.json")
        .await
        .expect_err("scheme");
    assert!(matches!(
        err,
        Error::Watch(WatchError::UnsupportedScheme(_))
    ));
}

#[tokio::test]
async fn test_fetch_missing_file_is_source_error() {
    let err = fetch_source("/nonexistent/gateway.json")
        .await
        .expect_err("missing");
    assert!(matches!(err, Error::Watch(WatchError::Source { .. })));
}

#[tokio::test]
async fn test_watcher_emits_on_file_change() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("gateway.json");
    tokio::fs::write(&path, r#"{"namespaces":[]}"#)
        .await
        .expect("seed");

    let (tx, mut rx) = mpsc::channel(4);
    let watcher = ConfigWatcher::spawn(
        watch_settings(path.to_str().expect("utf8 path")),
        None,
        tx,
    );

    // No seed digest: the first successful poll counts as a change.
    let first = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first poll")
        .expect("event");
    assert_eq!(first.text, r#"{"namespaces":[]}"#);

    tokio::fs::write(&path, r#"{"namespaces":[{"name":"edge"}]}"#)
        .await
        .expect("rewrite");
    let second = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("second poll")
        .expect("event");
    assert!(second.text.contains("edge"));

    watcher.close().await;
}

#[tokio::test]
async fn test_watcher_polls_http_source_with_etag() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use warp::Filter;

    let body = Arc::new(parking_lot::Mutex::new(String::from(r#"{"namespaces":[]}"#)));
    let not_modified = Arc::new(AtomicUsize::new(0));

    let served = body.clone();
    let hits = not_modified.clone();
    let route = warp::path!("gateway.json")
        .and(warp::header::optional::<String>("if-none-match"))
        .map(move |tag: Option<String>| {
            let text = served.lock().clone();
            let etag = format!("\"{}\"", digest(&text));
            if tag.as_deref() == Some(etag.as_str()) {
                hits.fetch_add(1, Ordering::SeqCst);
                warp::http::Response::builder()
                    .status(304)
                    .header("etag", etag)
                    .body(String::new())
                    .expect("response")
            } else {
                warp::http::Response::builder()
                    .status(200)
                    .header("etag", etag)
                    .body(text)
                    .expect("response")
            }
        });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    let server = tokio::spawn(server);

    let (tx, mut rx) = mpsc::channel(4);
    let watcher = ConfigWatcher::spawn(
        watch_settings(&format!("http://{}/gateway.json", addr)),
        None,
        tx,
    );

    let first = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first poll")
        .expect("event");
    assert_eq!(first.text, r#"{"namespaces":[]}"#);

    // Unchanged content turns further polls into 304 round-trips and never
    // re-fires.
    assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());
    assert!(not_modified.load(Ordering::SeqCst) >= 1);

    *body.lock() = r#"{"namespaces":[{"name":"edge"}]}"#.to_string();
    let second = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("second poll")
        .expect("event");
    assert!(second.text.contains("edge"));

    watcher.close().await;
    server.abort();
}

#[tokio::test]
async fn test_watcher_seeded_digest_suppresses_refire() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("gateway.json");
    let text = r#"{"namespaces":[]}"#;
    tokio::fs::write(&path, text).await.expect("seed");

    let (tx, mut rx) = mpsc::channel(4);
    let watcher = ConfigWatcher::spawn(
        watch_settings(path.to_str().expect("utf8 path")),
        Some(text),
        tx,
    );

    // Unchanged content never fires.
    assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());
    watcher.close().await;
}
