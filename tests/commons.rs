use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flowgate::Engine;
use flowgate::EngineBuilder;
use flowgate::GatewaySettings;
use serde_json::json;
use serde_json::Value;
use tokio::sync::watch;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for integration test.");
}

/// Grabs a port the OS considers free right now. A small race with other
/// processes is possible; tests retry connects to absorb it.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral")
        .local_addr()
        .expect("local addr")
        .port()
}

/// One tcp server binding routed into one echo binding.
pub fn echo_document(port: u16, window: Option<u32>) -> String {
    let echo_options = match window {
        Some(w) => json!({ "window": w }),
        None => Value::Null,
    };
    json!({
        "namespaces": [
            {
                "name": "edge",
                "bindings": [
                    {
                        "name": "south",
                        "type": "tcp",
                        "kind": "server",
                        "options": { "port": port },
                        "routes": [ { "exit": "mirror" } ]
                    },
                    {
                        "name": "mirror",
                        "type": "echo",
                        "kind": "duplex",
                        "options": echo_options
                    }
                ]
            }
        ]
    })
    .to_string()
}

pub struct TestGateway {
    pub engine: Arc<Engine>,
    pub shutdown_tx: watch::Sender<()>,
    doc_path: PathBuf,
    runner: Option<tokio::task::JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl TestGateway {
    /// Rewrites the watched routing document in place.
    pub async fn rewrite(&self, doc: &str) {
        tokio::fs::write(&self.doc_path, doc)
            .await
            .expect("rewrite document");
    }

    pub async fn stop(self) {
        match self.runner {
            Some(runner) => {
                self.shutdown_tx.send(()).expect("send shutdown");
                runner.await.expect("runner join");
            }
            None => self.engine.close().await.expect("close engine"),
        }
    }
}

fn build_engine(
    doc: &str,
    dir: &tempfile::TempDir,
    tune: impl FnOnce(&mut GatewaySettings),
) -> (Arc<Engine>, watch::Sender<()>, PathBuf) {
    enable_logger();
    let doc_path = dir.path().join("gateway.json");
    std::fs::write(&doc_path, doc).expect("write document");

    let mut settings = GatewaySettings::default();
    settings.runtime.worker_count = 1;
    settings.monitoring.prometheus_enabled = false;
    settings.watch.source = doc_path.to_str().expect("utf8 path").to_string();
    settings.watch.poll_interval_ms = 100;
    settings.watch.jitter_ms = 0;
    tune(&mut settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let engine = EngineBuilder::init(settings, shutdown_rx)
        .build()
        .ready()
        .expect("build engine");
    (engine, shutdown_tx, doc_path)
}

/// Starts the gateway without the reload loop; configuration is applied
/// once from the document.
pub async fn start_gateway(doc: &str) -> TestGateway {
    start_gateway_with(doc, |_| {}).await
}

pub async fn start_gateway_with(
    doc: &str,
    tune: impl FnOnce(&mut GatewaySettings),
) -> TestGateway {
    let dir = tempfile::tempdir().expect("tempdir");
    let (engine, shutdown_tx, doc_path) = build_engine(doc, &dir, tune);
    engine.start().await.expect("start gateway");
    TestGateway {
        engine,
        shutdown_tx,
        doc_path,
        runner: None,
        _dir: dir,
    }
}

/// Starts the gateway with the full run loop, so watched document changes
/// are applied.
pub async fn spawn_gateway(doc: &str) -> TestGateway {
    let dir = tempfile::tempdir().expect("tempdir");
    let (engine, shutdown_tx, doc_path) = build_engine(doc, &dir, |_| {});

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                panic!("gateway run failed: {:?}", e);
            }
        })
    };
    for _ in 0..50 {
        if engine.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(engine.is_ready(), "gateway did not become ready");

    TestGateway {
        engine,
        shutdown_tx,
        doc_path,
        runner: Some(runner),
        _dir: dir,
    }
}

pub fn connect(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("read timeout");
            stream.set_nodelay(true).ok();
            return stream;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("connect to 127.0.0.1:{} failed", port);
}

pub fn assert_echo(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).expect("write payload");
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).expect("read echo");
    assert_eq!(echoed, payload);
}

/// Retries until a fresh connection to `port` echoes `payload`, returning
/// the connection. Absorbs listener startup and reload races.
pub fn wait_for_echo(port: u16, payload: &[u8]) -> TcpStream {
    for _ in 0..50 {
        if let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)) {
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("read timeout");
            stream.set_nodelay(true).ok();
            if stream.write_all(payload).is_ok() {
                let mut echoed = vec![0u8; payload.len()];
                if stream.read_exact(&mut echoed).is_ok() && echoed == payload {
                    return stream;
                }
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("no echo on port {}", port);
}
