use lazy_static::lazy_static;
use prometheus::{GaugeVec, IntCounter, IntCounterVec, Opts, Registry};
use tokio::sync::watch;
use warp::{Filter, Rejection, Reply};

lazy_static! {
    pub static ref STREAMS_OPENED: IntCounterVec = IntCounterVec::new(
        Opts::new("streams_opened", "Streams opened, by worker"),
        &["worker"]
    )
    .expect("metric can not be created");

    pub static ref STREAMS_CLOSED: IntCounterVec = IntCounterVec::new(
        Opts::new("streams_closed", "Streams ended normally, by worker"),
        &["worker"]
    )
    .expect("metric can not be created");

    pub static ref STREAMS_ABORTED: IntCounterVec = IntCounterVec::new(
        Opts::new("streams_aborted", "Streams aborted by the sender, by worker"),
        &["worker"]
    )
    .expect("metric can not be created");

    pub static ref STREAMS_RESET: IntCounterVec = IntCounterVec::new(
        Opts::new("streams_reset", "Streams reset by the receiver, by worker"),
        &["worker"]
    )
    .expect("metric can not be created");

    pub static ref FRAMES_DISPATCHED: IntCounterVec = IntCounterVec::new(
        Opts::new("frames_dispatched", "Frames dispatched into handlers, by worker"),
        &["worker"]
    )
    .expect("metric can not be created");

    pub static ref PROTOCOL_VIOLATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("protocol_violations", "Frames rejected as protocol violations"),
        &["worker"]
    )
    .expect("metric can not be created");

    pub static ref RECONFIGURATIONS: IntCounter = IntCounter::new(
        "reconfigurations_total",
        "Successful configuration swaps"
    )
    .expect("metric can not be created");

    pub static ref RECONFIGURATION_ROLLBACKS: IntCounter = IntCounter::new(
        "reconfiguration_rollbacks_total",
        "Failed swaps rolled back to the previous configuration"
    )
    .expect("metric can not be created");

    pub static ref BUDGET_STALLS: IntCounter = IntCounter::new(
        "budget_stalls_total",
        "Debits rejected for insufficient credit"
    )
    .expect("metric can not be created");

    pub static ref WORKER_QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new("worker_queue_depth", "Pending frames per worker queue"),
        &["worker"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Registering an already-registered collector is a no-op, so the server
/// can be restarted without panicking.
fn register(collector: Box<dyn prometheus::core::Collector>) {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
        Err(e) => panic!("collector can not be registered: {}", e),
    }
}

fn register_custom_metrics() {
    register(Box::new(STREAMS_OPENED.clone()));
    register(Box::new(STREAMS_CLOSED.clone()));
    register(Box::new(STREAMS_ABORTED.clone()));
    register(Box::new(STREAMS_RESET.clone()));
    register(Box::new(FRAMES_DISPATCHED.clone()));
    register(Box::new(PROTOCOL_VIOLATIONS.clone()));
    register(Box::new(RECONFIGURATIONS.clone()));
    register(Box::new(RECONFIGURATION_ROLLBACKS.clone()));
    register(Box::new(BUDGET_STALLS.clone()));
    register(Box::new(WORKER_QUEUE_DEPTH.clone()));
}

pub async fn start_server(port: u16, mut shutdown_signal: watch::Receiver<()>) {
    register_custom_metrics();

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        eprintln!("could not encode custom metrics: {}", e);
    };
    let mut res = match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        eprintln!("could not encode prometheus metrics: {}", e);
    };
    let res_custom = match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("prometheus metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };

    res.push_str(&res_custom);
    Ok(res)
}

#[cfg(test)]
mod metrics_test;
